use crate::pipeline::{Pipeline, Session, create_multiple, get_or_create_by};
use crate::transform::{Chain, constant, custom, filter, get, has, non_empty, parse_datetime, when};
use crate::{ApiResult, Entity, EntityId, Kind, Kwargs, Value};
use chrono::NaiveDateTime;

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

pub const TEAM: Kind = Kind::new("team");
pub const GROUP: Kind = Kind::new("group");
pub const SEASON: Kind = Kind::new("season");
pub const MATCH: Kind = Kind::new("match");
pub const RESULT: Kind = Kind::new("result");

/// True for the result record holding the final score. OpenLigaDB calls it
/// "Endergebnis"; other feeds say "Final".
pub fn is_final_result(result: &Value) -> bool {
    result
        .member("ResultName")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .is_some_and(|name| name.contains("end") || name.contains("final"))
}

/// Points of the given side (`"PointsTeam1"`/`"PointsTeam2"`) in the final
/// result, or 0 when no final result has been posted yet.
fn final_points(side: &'static str) -> Chain {
    get("MatchResults")
        .then(filter(is_final_result))
        .then(when(non_empty, get(0).then(get(side))).otherwise(constant(0_i64)))
}

fn optional(name: &'static str) -> Chain {
    when(has(name), get(name)).into()
}

/// The OpenLigaDB match document transformations.
pub fn openliga_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.register(
        TEAM,
        [
            ("id", get("TeamId")),
            ("name", get("TeamName")),
            ("short_name", optional("ShortName")),
        ],
    );
    pipeline.register(
        GROUP,
        [
            ("id", get("GroupID")),
            ("order_id", get("GroupOrderID")),
            ("name", optional("GroupName")),
        ],
    );
    pipeline.register(
        RESULT,
        [
            ("id", get("ResultID")),
            ("order_id", optional("ResultOrderID")),
            ("name", optional("ResultName")),
            ("host_points", get("PointsTeam1")),
            ("guest_points", get("PointsTeam2")),
            (
                "is_final",
                custom(|result| Ok(Value::Bool(is_final_result(&result)))),
            ),
        ],
    );
    pipeline.register(
        MATCH,
        [
            ("id", get("MatchID")),
            ("date", get("MatchDateTime").then(custom(parse_datetime))),
            ("is_finished", get("MatchIsFinished")),
            ("group", get("Group").then(get_or_create_by(GROUP, ["id"]))),
            ("host", get("Team1").then(get_or_create_by(TEAM, ["id"]))),
            ("guest", get("Team2").then(get_or_create_by(TEAM, ["id"]))),
            ("host_points", final_points("PointsTeam1")),
            ("guest_points", final_points("PointsTeam2")),
            ("results", get("MatchResults").then(create_multiple(RESULT))),
        ],
    );
    pipeline
}

/// A fresh season entity for `year`.
pub fn season(year: i32) -> Entity {
    Entity::new(SEASON, Kwargs::from([("year".to_owned(), Value::from(year))]))
}

/// Attach `season` to a freshly built match: the match and its group point
/// at the season, and both teams list it among their seasons.
pub fn link_season(session: &mut Session<'_>, game: &mut Entity, season: EntityId) -> ApiResult<()> {
    game.set("season", season);
    session.entity_mut(game.reference("group")?)?.set("season", season);
    for side in ["host", "guest"] {
        session.entity_mut(game.reference(side)?)?.link("seasons", season);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub seasons: Vec<EntityId>,
}

impl TryFrom<&Entity> for Team {
    type Error = crate::ApiError;

    fn try_from(e: &Entity) -> ApiResult<Self> {
        Ok(Self {
            id: e.int("id")?,
            name: e.text("name")?.to_owned(),
            short_name: e.optional_text("short_name")?.map(str::to_owned),
            seasons: e.references("seasons")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: i64,
    pub order_id: i64,
    pub name: Option<String>,
    pub season: Option<EntityId>,
}

impl TryFrom<&Entity> for Group {
    type Error = crate::ApiError;

    fn try_from(e: &Entity) -> ApiResult<Self> {
        Ok(Self {
            id: e.int("id")?,
            order_id: e.int("order_id")?,
            name: e.optional_text("name")?.map(str::to_owned),
            season: e.get("season").and_then(Value::as_entity),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Season {
    pub year: i64,
}

impl TryFrom<&Entity> for Season {
    type Error = crate::ApiError;

    fn try_from(e: &Entity) -> ApiResult<Self> {
        Ok(Self { year: e.int("year")? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub id: i64,
    pub order_id: Option<i64>,
    pub name: Option<String>,
    pub host_points: i64,
    pub guest_points: i64,
    pub is_final: bool,
}

impl TryFrom<&Entity> for MatchResult {
    type Error = crate::ApiError;

    fn try_from(e: &Entity) -> ApiResult<Self> {
        Ok(Self {
            id: e.int("id")?,
            order_id: e.optional_int("order_id")?,
            name: e.optional_text("name")?.map(str::to_owned),
            host_points: e.int("host_points")?,
            guest_points: e.int("guest_points")?,
            is_final: e.flag("is_final")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub id: i64,
    pub date: NaiveDateTime,
    pub is_finished: bool,
    pub group: EntityId,
    pub host: EntityId,
    pub guest: EntityId,
    pub host_points: i64,
    pub guest_points: i64,
    pub results: Vec<EntityId>,
    pub season: Option<EntityId>,
}

impl TryFrom<&Entity> for Match {
    type Error = crate::ApiError;

    fn try_from(e: &Entity) -> ApiResult<Self> {
        Ok(Self {
            id: e.int("id")?,
            date: e.datetime("date")?,
            is_finished: e.flag("is_finished")?,
            group: e.reference("group")?,
            host: e.reference("host")?,
            guest: e.reference("guest")?,
            host_points: e.int("host_points")?,
            guest_points: e.int("guest_points")?,
            results: e.references("results")?,
            season: e.get("season").and_then(Value::as_entity),
        })
    }
}
