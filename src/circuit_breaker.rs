use failsafe::{backoff, failure_policy, Config};
use std::time::Duration;

/// Circuit breaker for the serverless-function clients (mailer, directory).
///
/// Five consecutive failures open the circuit; recovery attempts back off
/// exponentially from 10s to 60s. While open, calls fail fast instead of
/// piling timeouts onto an unreachable function endpoint.
pub fn create_function_circuit_breaker() -> impl failsafe::CircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
