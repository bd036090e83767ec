use crate::CodeCrowError;
use crate::analyses::AnalysisRepository;
use crate::events::EventRepository;
use crate::gates::GateRepository;
use crate::jobs::JobRepository;
use crate::locks::LockRepository;
use crate::projects::ProjectRepository;
use crate::rag::RagRepository;
use crate::rate_limits::RateLimitRepository;

pub trait Store {
    type Jobs<'a>: JobRepository
    where
        Self: 'a;
    type Analyses<'a>: AnalysisRepository
    where
        Self: 'a;
    type Gates<'a>: GateRepository
    where
        Self: 'a;
    type Locks<'a>: LockRepository
    where
        Self: 'a;
    type Rag<'a>: RagRepository
    where
        Self: 'a;
    type RateLimits<'a>: RateLimitRepository
    where
        Self: 'a;
    type Projects<'a>: ProjectRepository
    where
        Self: 'a;
    type Events<'a>: EventRepository
    where
        Self: 'a;

    fn jobs(&self) -> Self::Jobs<'_>;
    fn analyses(&self) -> Self::Analyses<'_>;
    fn gates(&self) -> Self::Gates<'_>;
    fn locks(&self) -> Self::Locks<'_>;
    fn rag(&self) -> Self::Rag<'_>;
    fn rate_limits(&self) -> Self::RateLimits<'_>;
    fn projects(&self) -> Self::Projects<'_>;
    fn events(&self) -> Self::Events<'_>;

    fn with_tx<F, T>(&self, f: F) -> Result<T, CodeCrowError>
    where
        F: FnOnce(&Self) -> Result<T, CodeCrowError>;
}
