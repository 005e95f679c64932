//! Concurrent per-season download feeding the pipeline.
//!
//! [`Acquisition::ingest`] spawns one fetch task per requested season, capped
//! by a semaphore, and returns an [`Ingestion`]. Documents are materialized on
//! the consuming side, one match per [`Ingestion::next`] call, in the order
//! the fetches complete. Only the consumer touches the store.
use crate::client::{DEFAULT_LEAGUE, DocumentSource};
use crate::models::{self, MATCH, SEASON};
use crate::pipeline::{Pipeline, Session};
use crate::store::Store;
use crate::{ApiError, ApiResult, Entity, EntityId, Kwargs, Value};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

type Fetched = (i32, ApiResult<serde_json::Value>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Fetch tasks are spawned but nothing has been consumed yet.
    Dispatched,
    Fetching,
    Completed,
    Failed,
}

pub struct Acquisition<S> {
    source: Arc<S>,
    pipeline: Pipeline,
    max_in_flight: usize,
}

impl<S: DocumentSource> Acquisition<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            pipeline: models::openliga_pipeline(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Replace the default OpenLigaDB transformations. The pipeline must
    /// register the match, team and group kinds.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Start fetching `seasons` of `league` (default `bl1`). A season listed
    /// more than once is fetched once.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// [`Ingestion`] aborts fetch tasks that have not finished, though a
    /// request already on the wire may still complete.
    pub fn ingest(&self, seasons: &[i32], league: Option<&str>) -> Ingestion<'_> {
        let league = league.unwrap_or(DEFAULT_LEAGUE).to_owned();
        let mut unique = Vec::with_capacity(seasons.len());
        for &season in seasons {
            if !unique.contains(&season) {
                unique.push(season);
            }
        }
        let seasons = unique.as_slice();
        let permits = Arc::new(Semaphore::new(self.max_in_flight.min(seasons.len()).max(1)));
        let mut fetches = JoinSet::new();

        for &season in seasons {
            let source = Arc::clone(&self.source);
            let permits = Arc::clone(&permits);
            let league = league.clone();
            fetches.spawn(async move {
                let _permit = permits.acquire_owned().await;
                debug!("fetching {league} season {season}");
                let document = source.fetch_season(&league, season).await;
                (season, document)
            });
        }
        info!("dispatched {} season fetches for {league}", seasons.len());

        Ingestion {
            pipeline: &self.pipeline,
            fetches,
            batch: None,
            phase: Phase::Dispatched,
        }
    }
}

struct SeasonBatch {
    year: i32,
    season: EntityId,
    records: std::vec::IntoIter<Value>,
}

/// A running acquisition. Yields materialized matches one at a time.
pub struct Ingestion<'p> {
    pipeline: &'p Pipeline,
    fetches: JoinSet<Fetched>,
    batch: Option<SeasonBatch>,
    phase: Phase,
}

impl Ingestion<'_> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Fetches not yet handed to the consumer.
    pub fn pending(&self) -> usize {
        self.fetches.len()
    }

    /// The next match, with its season linked. `None` once every season is
    /// exhausted, or after the first error has been returned.
    ///
    /// Matches are not added to the store; teams, groups and results they
    /// reference are. Committing is up to the caller.
    pub async fn next(&mut self, session: &mut Session<'_>) -> Option<ApiResult<Entity>> {
        match self.phase {
            Phase::Dispatched => self.phase = Phase::Fetching,
            Phase::Fetching => {}
            Phase::Completed | Phase::Failed => return None,
        }
        match self.advance(session).await {
            Ok(Some(game)) => Some(Ok(game)),
            Ok(None) => {
                info!("acquisition complete");
                self.phase = Phase::Completed;
                None
            }
            Err(e) => {
                error!("acquisition failed: {e}");
                self.fetches.abort_all();
                self.batch = None;
                self.phase = Phase::Failed;
                Some(Err(e))
            }
        }
    }

    async fn advance(&mut self, session: &mut Session<'_>) -> ApiResult<Option<Entity>> {
        loop {
            if let Some(batch) = &mut self.batch {
                if let Some(record) = batch.records.next() {
                    let mut game = self.pipeline.create(&MATCH, &record, session)?;
                    models::link_season(session, &mut game, batch.season)?;
                    return Ok(Some(game));
                }
                info!("season {} materialized", batch.year);
                self.batch = None;
            }

            let Some(joined) = self.fetches.join_next().await else {
                return Ok(None);
            };
            let (year, document) =
                joined.map_err(|e| ApiError::Other(format!("fetch task failed: {e}")))?;
            let Value::List(records) = Value::from(document?) else {
                return Err(ApiError::Coercion(format!(
                    "season {year} document is not a list of matches"
                )));
            };
            debug!("season {year} fetched with {} matches", records.len());
            let season = session.add(models::season(year))?;
            self.batch = Some(SeasonBatch { year, season, records: records.into_iter() });
        }
    }
}

/// Split requested seasons into those still to fetch and those the store
/// already holds. Repeated requests for a season are collapsed.
pub fn partition_periods(store: &dyn Store, seasons: &[i32]) -> ApiResult<(Vec<i32>, Vec<i32>)> {
    let mut fresh = Vec::new();
    let mut skipped = Vec::new();
    for &year in seasons {
        if fresh.contains(&year) || skipped.contains(&year) {
            continue;
        }
        let criteria = Kwargs::from([("year".to_owned(), Value::from(year))]);
        if store.find(&SEASON, &criteria)?.is_some() {
            skipped.push(year);
        } else {
            fresh.push(year);
        }
    }
    Ok((fresh, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Match, Season, TEAM, Team};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Default)]
    struct FakeSource {
        documents: HashMap<i32, serde_json::Value>,
        delays: HashMap<i32, Duration>,
        failures: HashSet<i32>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeSource {
        fn with_season(mut self, year: i32, document: serde_json::Value) -> Self {
            self.documents.insert(year, document);
            self
        }

        fn delayed(mut self, year: i32, millis: u64) -> Self {
            self.delays.insert(year, Duration::from_millis(millis));
            self
        }

        fn failing(mut self, year: i32) -> Self {
            self.failures.insert(year);
            self
        }
    }

    impl DocumentSource for FakeSource {
        async fn fetch_season(&self, league: &str, season: i32) -> ApiResult<serde_json::Value> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(self.delays.get(&season).copied().unwrap_or(Duration::from_millis(5))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failures.contains(&season) {
                return Err(ApiError::Status(503, format!("fake://{league}/{season}")));
            }
            self.documents
                .get(&season)
                .cloned()
                .ok_or_else(|| ApiError::Status(404, format!("fake://{league}/{season}")))
        }
    }

    fn team(id: i64) -> serde_json::Value {
        json!({"TeamId": id, "TeamName": format!("Team {id}")})
    }

    fn fixture(id: i64, host: i64, guest: i64) -> serde_json::Value {
        json!({
            "MatchID": id,
            "MatchDateTime": "2016-08-26T20:30:00",
            "MatchIsFinished": true,
            "Group": {"GroupID": id / 10, "GroupOrderID": 1},
            "Team1": team(host),
            "Team2": team(guest),
            "MatchResults": [
                {"ResultID": id * 10 + 2, "ResultOrderID": 2, "ResultName": "Endergebnis",
                 "PointsTeam1": 2, "PointsTeam2": 1},
            ],
        })
    }

    /// Two matches per season between teams 1, 2 and 3; team 1 plays twice.
    fn season_document(year: i32) -> serde_json::Value {
        let base = i64::from(year) * 100;
        json!([fixture(base + 1, 1, 2), fixture(base + 2, 3, 1)])
    }

    async fn drain(
        ingestion: &mut Ingestion<'_>,
        session: &mut Session<'_>,
    ) -> (Vec<Entity>, Option<ApiError>) {
        let mut games = Vec::new();
        while let Some(next) = ingestion.next(session).await {
            match next {
                Ok(game) => games.push(game),
                Err(e) => return (games, Some(e)),
            }
        }
        (games, None)
    }

    fn season_of(session: &Session<'_>, game: &Entity) -> i64 {
        let season = Match::try_from(game).unwrap().season.unwrap();
        Season::try_from(session.entity(season).unwrap()).unwrap().year
    }

    #[tokio::test]
    async fn shared_team_resolves_to_one_entity() {
        let acquisition = Acquisition::new(FakeSource::default().with_season(2016, season_document(2016)));
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&[2016], None);
        let (games, err) = drain(&mut ingestion, &mut session).await;
        assert!(err.is_none());
        assert_eq!(ingestion.phase(), Phase::Completed);
        assert_eq!(games.len(), 2);

        let first = Match::try_from(&games[0]).unwrap();
        let second = Match::try_from(&games[1]).unwrap();
        assert_eq!(first.host, second.guest);
        assert_ne!(first.guest, second.host);

        let shared = Team::try_from(session.entity(first.host).unwrap()).unwrap();
        assert_eq!(shared.id, 1);
        assert_eq!(shared.seasons, vec![first.season.unwrap()]);

        drop(session);
        assert_eq!(store.count(&TEAM), 3);
        assert_eq!(store.count(&SEASON), 1);
    }

    #[tokio::test]
    async fn every_season_is_yielded_once_regardless_of_completion_order() {
        let source = [2015, 2016, 2017]
            .into_iter()
            .fold(FakeSource::default(), |s, y| s.with_season(y, season_document(y)))
            .delayed(2015, 150);
        let acquisition = Acquisition::new(source);
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&[2015, 2016, 2017], Some("bl1"));
        let (games, err) = drain(&mut ingestion, &mut session).await;
        assert!(err.is_none());
        assert_eq!(games.len(), 6);

        let years: Vec<i64> = games.iter().map(|g| season_of(&session, g)).collect();
        let distinct: HashSet<i64> = years.iter().copied().collect();
        assert_eq!(distinct, HashSet::from([2015, 2016, 2017]));
        for year in [2015, 2016, 2017] {
            assert_eq!(years.iter().filter(|y| **y == year).count(), 2);
        }
        // The delayed season arrives last.
        assert_eq!(&years[4..], &[2015, 2015]);

        let ids: HashSet<i64> = games.iter().map(|g| g.int("id").unwrap()).collect();
        assert_eq!(ids.len(), 6);

        // Teams recur across seasons and collect every season exactly once.
        let first = Match::try_from(&games[0]).unwrap();
        let shared = Team::try_from(session.entity(first.host).unwrap()).unwrap();
        assert_eq!(shared.seasons.len(), 3);

        drop(session);
        assert_eq!(store.count(&TEAM), 3);
        assert_eq!(store.count(&SEASON), 3);
    }

    #[tokio::test]
    async fn failing_season_aborts_without_yielding_its_matches() {
        let source = [2015, 2017]
            .into_iter()
            .fold(FakeSource::default(), |s, y| s.with_season(y, season_document(y)))
            .failing(2016)
            .delayed(2016, 100);
        let acquisition = Acquisition::new(source);
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&[2015, 2016, 2017], None);
        let (games, err) = drain(&mut ingestion, &mut session).await;

        let err = err.expect("the 2016 fetch should fail");
        assert!(err.is_transport(), "{err}");
        assert_eq!(ingestion.phase(), Phase::Failed);
        assert!(ingestion.next(&mut session).await.is_none());

        assert_eq!(games.len(), 4);
        for game in &games {
            assert_ne!(season_of(&session, game), 2016);
            let game = Match::try_from(game).unwrap();
            assert!(session.entity(game.host).is_ok());
        }
    }

    #[tokio::test]
    async fn phase_moves_from_dispatched_through_fetching() {
        let acquisition = Acquisition::new(FakeSource::default().with_season(2016, season_document(2016)));
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&[2016], None);
        assert_eq!(ingestion.phase(), Phase::Dispatched);
        assert!(ingestion.next(&mut session).await.unwrap().is_ok());
        assert_eq!(ingestion.phase(), Phase::Fetching);
        assert!(ingestion.next(&mut session).await.unwrap().is_ok());
        assert!(ingestion.next(&mut session).await.is_none());
        assert_eq!(ingestion.phase(), Phase::Completed);
    }

    #[tokio::test]
    async fn repeated_seasons_are_fetched_once() {
        let acquisition = Acquisition::new(FakeSource::default().with_season(2016, season_document(2016)));
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&[2016, 2016], None);
        assert_eq!(ingestion.pending(), 1);
        let (games, err) = drain(&mut ingestion, &mut session).await;
        assert!(err.is_none(), "{err:?}");
        assert_eq!(games.len(), 2);
        drop(session);
        assert_eq!(store.count(&SEASON), 1);
    }

    #[tokio::test]
    async fn fetch_concurrency_is_capped() {
        let years = [2010, 2011, 2012, 2013, 2014];
        let source = years
            .into_iter()
            .fold(FakeSource::default(), |s, y| s.with_season(y, json!([])).delayed(y, 20));
        let acquisition = Acquisition::new(source).with_max_in_flight(2);
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&years, None);
        let (games, err) = drain(&mut ingestion, &mut session).await;
        assert!(err.is_none());
        assert!(games.is_empty());
        assert!(acquisition.source.peak.load(Ordering::SeqCst) <= 2);
        drop(session);
        assert_eq!(store.count(&SEASON), 5);
    }

    #[tokio::test]
    async fn non_list_document_is_a_type_error() {
        let source = FakeSource::default().with_season(2016, json!({"error": "nope"}));
        let acquisition = Acquisition::new(source);
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&[2016], None);
        let (_, err) = drain(&mut ingestion, &mut session).await;
        assert!(matches!(err, Some(ApiError::Coercion(_))));
    }

    #[tokio::test]
    async fn nothing_requested_completes_immediately() {
        let acquisition = Acquisition::new(FakeSource::default());
        let mut store = MemoryStore::default();
        let mut session = Session::new(&mut store);

        let mut ingestion = acquisition.ingest(&[], None);
        assert!(ingestion.next(&mut session).await.is_none());
        assert_eq!(ingestion.phase(), Phase::Completed);
    }

    #[test]
    fn partition_skips_present_and_repeated_seasons() {
        let mut store = MemoryStore::default();
        store.add(models::season(2015)).unwrap();

        let (fresh, skipped) = partition_periods(&store, &[2014, 2015, 2016, 2014]).unwrap();
        assert_eq!(fresh, vec![2014, 2016]);
        assert_eq!(skipped, vec![2015]);
    }
}
