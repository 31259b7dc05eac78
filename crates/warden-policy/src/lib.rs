/// Policy subsystem for the Warden tool broker.
///
/// Everything that decides whether a call may proceed and what trace it
/// leaves behind:
/// - **Engine**: the ordered admission pipeline
/// - **Rate limiting**: sliding per-minute windows and concurrency caps
/// - **Sanitizer**: script-injection stripping over parameter strings
/// - **Redaction**: sensitive-key scrubbing for audit entries
/// - **Audit ring**: bounded in-memory trail of recent decisions
pub mod audit;
pub mod engine;
pub mod rate_limit;
pub mod redact;
pub mod sanitize;
