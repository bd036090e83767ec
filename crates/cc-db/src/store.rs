use cc_core::CodeCrow;
use cc_core::error::CodeCrowError;
use cc_core::provider::CoreProvider;
use cc_core::store::Store;
use cc_events::bus::EventBus;
use rusqlite::Connection;

use crate::analysis_repo::AnalysisRepo;
use crate::event_repo::EventRepo;
use crate::gate_repo::GateRepo;
use crate::job_repo::JobRepo;
use crate::lock_repo::LockRepo;
use crate::project_repo::ProjectRepo;
use crate::rag_repo::RagRepo;
use crate::rate_limit_repo::RateLimitRepo;
use crate::schema;

pub struct DbStore {
    conn: Connection,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn tx_error(err: rusqlite::Error) -> CodeCrowError {
    CodeCrowError::Internal {
        message: format!("transaction failed: {err}"),
    }
}

impl Store for DbStore {
    type Jobs<'a>
        = JobRepo<'a>
    where
        Self: 'a;
    type Analyses<'a>
        = AnalysisRepo<'a>
    where
        Self: 'a;
    type Gates<'a>
        = GateRepo<'a>
    where
        Self: 'a;
    type Locks<'a>
        = LockRepo<'a>
    where
        Self: 'a;
    type Rag<'a>
        = RagRepo<'a>
    where
        Self: 'a;
    type RateLimits<'a>
        = RateLimitRepo<'a>
    where
        Self: 'a;
    type Projects<'a>
        = ProjectRepo<'a>
    where
        Self: 'a;
    type Events<'a>
        = EventRepo<'a>
    where
        Self: 'a;

    fn jobs(&self) -> Self::Jobs<'_> {
        JobRepo::new(&self.conn)
    }

    fn analyses(&self) -> Self::Analyses<'_> {
        AnalysisRepo::new(&self.conn)
    }

    fn gates(&self) -> Self::Gates<'_> {
        GateRepo::new(&self.conn)
    }

    fn locks(&self) -> Self::Locks<'_> {
        LockRepo::new(&self.conn)
    }

    fn rag(&self) -> Self::Rag<'_> {
        RagRepo::new(&self.conn)
    }

    fn rate_limits(&self) -> Self::RateLimits<'_> {
        RateLimitRepo::new(&self.conn)
    }

    fn projects(&self) -> Self::Projects<'_> {
        ProjectRepo::new(&self.conn)
    }

    fn events(&self) -> Self::Events<'_> {
        EventRepo::new(&self.conn)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, CodeCrowError>
    where
        F: FnOnce(&Self) -> Result<T, CodeCrowError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(tx_error)?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(tx_error)?;
                Ok(value)
            }
            Err(err) => {
                self.conn.execute_batch("ROLLBACK").map_err(tx_error)?;
                Err(err)
            }
        }
    }
}

/// Opens one connection per call against a shared database file, so async
/// callers never hold a connection across an await point.
#[derive(Clone)]
pub struct DbProvider {
    db_path: String,
    event_bus: EventBus,
}

impl DbProvider {
    pub fn new(db_path: impl Into<String>, event_bus: EventBus) -> Self {
        Self {
            db_path: db_path.into(),
            event_bus,
        }
    }

    /// Applies migrations once; later `open` calls skip them.
    pub fn migrate(&self) -> Result<(), CodeCrowError> {
        schema::open_and_migrate(&self.db_path)
            .map(|_| ())
            .map_err(|err| CodeCrowError::Internal {
                message: format!("migration failed: {err}"),
            })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

impl CoreProvider for DbProvider {
    type Store = DbStore;

    fn open(&self) -> Result<CodeCrow<DbStore>, CodeCrowError> {
        let conn = schema::open(&self.db_path).map_err(|err| CodeCrowError::Internal {
            message: format!("failed to open {}: {err}", self.db_path),
        })?;
        Ok(CodeCrow::new(DbStore::new(conn), self.event_bus.clone()))
    }
}
