pub mod system;
pub mod thermal;

use crate::state::HostReading;

/// One cycle of raw host readings plus the sources that fell back to a
/// default value.
#[derive(Debug, Clone, Default)]
pub struct ProbeSample {
    pub reading: HostReading,
    pub failed_sources: Vec<&'static str>,
}

pub trait HostProbe: Send {
    fn sample(&mut self) -> ProbeSample;
}
