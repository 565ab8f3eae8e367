#[path = "property/daily_cap.rs"]
mod daily_cap;

#[path = "property/cooldown.rs"]
mod cooldown;

#[path = "property/incident_dedup.rs"]
mod incident_dedup;

#[path = "property/status_monotonicity.rs"]
mod status_monotonicity;

#[path = "property/isolation_idempotence.rs"]
mod isolation_idempotence;
