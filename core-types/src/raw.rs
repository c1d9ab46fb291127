use serde::Deserialize;

/// One fill as emitted by the node `node_fills_by_block` feed, before any
/// validation. Numeric amounts arrive as decimal strings; every field is
/// optional here so that absence is diagnosed by the normalizer instead of
/// failing the whole line in serde.
///
/// ```json
/// {"user":"0x...","coin":"BTC","px":"45000.0","sz":"1.5","side":"B",
///  "time":1704110400000,"oid":12345,"fee":"10.0","tid":67890, ...}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFill {
    pub user: Option<String>,
    pub coin: Option<String>,
    pub px: Option<String>,
    pub sz: Option<String>,
    pub side: Option<String>,
    /// Milliseconds since epoch.
    pub time: Option<i64>,
    /// Parent order id.
    pub oid: Option<i64>,
    pub fee: Option<String>,
    /// Source trade id, unique per fill when present.
    pub tid: Option<i64>,
    pub hash: Option<String>,
    pub crossed: Option<bool>,
    #[serde(rename = "startPosition")]
    pub start_position: Option<String>,
    pub dir: Option<String>,
    #[serde(rename = "closedPnl")]
    pub closed_pnl: Option<String>,
    #[serde(rename = "feeToken")]
    pub fee_token: Option<String>,
}
