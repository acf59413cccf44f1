//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data for contacts, deals, timestamps and
//! breaker tuning. Values that do not matter to a test are generated with
//! `fake`; values a test asserts on are fixed.

use chrono::{DateTime, TimeZone, Utc};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;

use core_kernel::{AdapterError, AdapterId, EntityType, NormalizedEntity, OperationId};
use domain_crm::{AdapterResult, ResolutionStrategy, SyncReport};
use domain_resilience::{CircuitBreakerConfig, HealthMonitorConfig};

/// Fixture for contact payloads
pub struct ContactFixtures;

impl ContactFixtures {
    /// Contact with the given email and generated name and phone
    pub fn with_email(email: &str) -> NormalizedEntity {
        NormalizedEntity::new()
            .with_field("email", email)
            .with_field("name", Name().fake::<String>())
            .with_field("phone", PhoneNumber().fake::<String>())
    }

    /// Contact with every value generated
    pub fn random() -> NormalizedEntity {
        Self::with_email(&SafeEmail().fake::<String>())
    }

    /// The contact used by the conflict scenarios
    pub fn ada() -> NormalizedEntity {
        NormalizedEntity::new()
            .with_field("email", "x@y.com")
            .with_field("name", "Ada Lovelace")
    }

    /// Contact without an email; rejected as malformed by email-keyed CRMs
    pub fn without_email() -> NormalizedEntity {
        NormalizedEntity::new().with_field("name", Name().fake::<String>())
    }
}

/// Fixture for deal payloads
pub struct DealFixtures;

impl DealFixtures {
    pub fn renewal() -> NormalizedEntity {
        NormalizedEntity::new()
            .with_field("name", format!("{} renewal", CompanyName().fake::<String>()))
            .with_field("amount", 12_500)
            .with_field("stage", "negotiation")
    }
}

/// Fixture for timestamps
pub struct TimeFixtures;

impl TimeFixtures {
    /// Jan 1, 2024
    pub fn earlier() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Jun 1, 2024
    pub fn later() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }
}

/// Fixture for finished sync reports
pub struct ReportFixtures;

impl ReportFixtures {
    /// Contact sync completed at `completed_at`: `crm-a` succeeded, `crm-b` timed out
    pub fn completed_at(completed_at: DateTime<Utc>) -> SyncReport {
        let contact = ContactFixtures::ada().with_external_id("mem-1");
        SyncReport {
            operation_id: OperationId::new_v7(),
            entity_type: EntityType::Contact,
            correlation_id: None,
            resolved_entity: Some(contact.clone()),
            conflicts: Vec::new(),
            resolution_strategy_used: ResolutionStrategy::PrimaryWins,
            primary_adapter: Some(AdapterId::from("crm-a")),
            requires_manual_review: false,
            per_adapter_results: vec![
                AdapterResult::success(AdapterId::from("crm-a"), contact, 12),
                AdapterResult::failure(
                    AdapterId::from("crm-b"),
                    &AdapterError::transient("timed out"),
                    200,
                ),
            ],
            started_at: completed_at - chrono::Duration::milliseconds(250),
            completed_at,
        }
    }

    /// Same as [`ReportFixtures::completed_at`], tagged with a correlation id
    pub fn correlated(completed_at: DateTime<Utc>, correlation_id: &str) -> SyncReport {
        SyncReport {
            correlation_id: Some(correlation_id.to_string()),
            ..Self::completed_at(completed_at)
        }
    }
}

/// Fixture for resilience tuning
pub struct ResilienceFixtures;

impl ResilienceFixtures {
    /// Window 10, minimum 5 calls, 50% threshold, 1s cooldown doubling up to 8s
    pub fn breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 10,
            minimum_calls: 5,
            failure_rate_threshold: 0.5,
            window_duration_ms: None,
            cooldown_ms: 1_000,
            backoff_multiplier: 2.0,
            max_cooldown_ms: 8_000,
        }
    }

    /// Monitor probing every second, alerting after 3 consecutive failures
    pub fn monitor() -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval_ms: 1_000,
            probe_timeout_ms: 200,
            failure_threshold: 3,
            history_capacity: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_fixtures() {
        let contact = ContactFixtures::with_email("a@b.com");
        assert_eq!(contact.str_field("email"), Some("a@b.com"));
        assert!(contact.str_field("name").is_some());

        assert!(ContactFixtures::random().str_field("email").unwrap().contains('@'));
        assert!(ContactFixtures::without_email().field("email").is_none());
    }

    #[test]
    fn test_report_fixture_is_partial() {
        let report = ReportFixtures::correlated(TimeFixtures::earlier(), "req-1");
        assert!(report.is_partial());
        assert_eq!(report.correlation_id.as_deref(), Some("req-1"));
        assert_eq!(report.duration_ms(), 250);
    }

    #[test]
    fn test_time_fixtures_are_ordered() {
        assert!(TimeFixtures::earlier() < TimeFixtures::later());
    }
}
