mod session_service;

#[cfg(test)]
mod session_service_tests;

pub use session_service::{
    EvictionOutcome, PostMessageRequest, SessionService, SessionServiceDependencies,
};
