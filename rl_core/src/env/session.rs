// Simulation session - the process-backed connection an adapter delegates to.

use crate::env::spaces::{Action, ActionSpace, Observation, ObservationSpace, ResetOptions, SessionStep};
use crate::error::EnvError;

/// A live connection to a running simulation.
///
/// Rewards are returned in the session's native type; adapters coerce them.
pub trait SimulationSession {
    fn observation_space(&self) -> &ObservationSpace;

    fn action_space(&self) -> &ActionSpace;

    fn reset(&mut self, options: &ResetOptions) -> Result<Observation, EnvError>;

    fn step(&mut self, action: &Action) -> Result<SessionStep, EnvError>;

    /// Shuts the simulation down. Called at most once.
    fn close(&mut self) -> Result<(), EnvError>;
}
