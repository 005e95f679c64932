/// OpenLigaDB wire types for the few responses decoded into fixed shapes.
/// Match documents themselves stay untyped and go through the pipeline.
/// Endpoint: https://www.openligadb.de/api/getmatchdata/{league}
use serde::Deserialize;

#[derive(Deserialize, Default, Debug)]
pub struct OpenLigaMatchHeader {
    #[serde(rename = "MatchID")]
    pub match_id: i64,
    #[serde(rename = "LeagueSeason", default)]
    pub league_season: Option<i32>,
    #[serde(rename = "LeagueName", default)]
    pub league_name: Option<String>,
    #[serde(rename = "Group")]
    pub group: OpenLigaGroup,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct OpenLigaGroup {
    #[serde(rename = "GroupID")]
    pub group_id: i64,
    #[serde(rename = "GroupOrderID")]
    pub group_order_id: i64,
    #[serde(rename = "GroupName", default)]
    pub group_name: String,
}
