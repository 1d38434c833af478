//! # Identity Resolver
//!
//! Reconciles identities reported by external systems into canonical
//! [`IdentityMapping`] rows. Resolution is keyed by canonicalized email;
//! corroborating sources raise confidence, contradicting high-confidence
//! sources flip the row to `Conflicted` instead of overwriting.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::error::EngineError;
use crate::models::{ConflictCandidate, ConflictResolution, IdentityMapping, MappingStatus};
use crate::repositories::IdentityStore;

/// Resolver over the identity-mapping store.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>, config: IdentityConfig) -> Self {
        Self { store, config }
    }

    /// Resolve one reported identity into a mapping, creating or updating as
    /// needed. Conflicts are recorded, never auto-resolved.
    pub async fn resolve(
        &self,
        external_system: &str,
        external_id: &str,
        email: &str,
    ) -> Result<IdentityMapping, EngineError> {
        let canonical = canonicalize_email(email);
        let now = Utc::now();

        // The same (system, external id) pair already bound to a different
        // email is the strongest conflict signal: the external system is
        // telling us one account maps to two people.
        if let Some(mut holder) = self
            .store
            .find_by_external(external_system, external_id)
            .await?
            .filter(|m| m.email_canonical != canonical)
        {
            warn!(
                external_system,
                external_id,
                existing = %holder.email_canonical,
                incoming = %canonical,
                "external id reported against a second canonical email"
            );
            holder.status = MappingStatus::Conflicted;
            holder.conflict_resolution = Some(ConflictResolution {
                field: "email".to_string(),
                existing: ConflictCandidate {
                    external_system: external_system.to_string(),
                    value: holder.email_canonical.clone(),
                    observed_at: holder.last_verified_at.unwrap_or(holder.updated_at),
                },
                incoming: ConflictCandidate {
                    external_system: external_system.to_string(),
                    value: canonical.clone(),
                    observed_at: now,
                },
                detected_at: now,
            });
            holder.updated_at = now;
            return Ok(self.store.update(holder).await?);
        }

        match self.store.get_by_canonical_email(&canonical).await? {
            Some(mapping) => self.merge(mapping, external_system, external_id, now).await,
            None => {
                let mut external_mappings = BTreeMap::new();
                external_mappings.insert(external_system.to_string(), external_id.to_string());
                let confidence = confidence_for(1);
                let mapping = IdentityMapping {
                    id: Uuid::new_v4(),
                    nova_user_id: Uuid::new_v4(),
                    email_raw: email.to_string(),
                    email_canonical: canonical,
                    external_mappings,
                    confidence,
                    status: if confidence >= self.config.promote_threshold {
                        MappingStatus::Active
                    } else {
                        MappingStatus::PendingReview
                    },
                    last_verified_at: Some(now),
                    verification_method: Some("connector_sync".to_string()),
                    conflict_resolution: None,
                    created_at: now,
                    updated_at: now,
                };
                debug!(
                    email_canonical = %mapping.email_canonical,
                    external_system,
                    "created identity mapping"
                );
                Ok(self.store.insert(mapping).await?)
            }
        }
    }

    async fn merge(
        &self,
        mut mapping: IdentityMapping,
        external_system: &str,
        external_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<IdentityMapping, EngineError> {
        match mapping.external_mappings.get(external_system) {
            // Known source disagreeing with what it told us before.
            Some(existing) if existing != external_id => {
                if mapping.confidence >= self.config.conflict_threshold {
                    warn!(
                        email_canonical = %mapping.email_canonical,
                        external_system,
                        "high-confidence mapping contradicted, marking conflicted"
                    );
                    mapping.status = MappingStatus::Conflicted;
                    mapping.conflict_resolution = Some(ConflictResolution {
                        field: "external_id".to_string(),
                        existing: ConflictCandidate {
                            external_system: external_system.to_string(),
                            value: existing.clone(),
                            observed_at: mapping.last_verified_at.unwrap_or(mapping.updated_at),
                        },
                        incoming: ConflictCandidate {
                            external_system: external_system.to_string(),
                            value: external_id.to_string(),
                            observed_at: now,
                        },
                        detected_at: now,
                    });
                } else {
                    // Low confidence: accept the correction.
                    mapping
                        .external_mappings
                        .insert(external_system.to_string(), external_id.to_string());
                    mapping.last_verified_at = Some(now);
                }
            }
            Some(_) => {
                // Re-confirmation from a known source.
                mapping.last_verified_at = Some(now);
                mapping.verification_method = Some("connector_sync".to_string());
            }
            None => {
                mapping
                    .external_mappings
                    .insert(external_system.to_string(), external_id.to_string());
                mapping.last_verified_at = Some(now);
                mapping.verification_method = Some("connector_sync".to_string());
            }
        }

        if mapping.status != MappingStatus::Conflicted {
            let sources = mapping.external_mappings.len();
            // Corroboration never lowers an already-earned confidence.
            mapping.confidence = mapping.confidence.max(confidence_for(sources));
            if mapping.status == MappingStatus::PendingReview
                && mapping.confidence >= self.config.promote_threshold
            {
                debug!(
                    email_canonical = %mapping.email_canonical,
                    confidence = mapping.confidence,
                    "promoting mapping to active"
                );
                mapping.status = MappingStatus::Active;
            }
        }
        mapping.updated_at = now;
        Ok(self.store.update(mapping).await?)
    }
}

/// Confidence from `n` independent agreeing sources: `1 - 0.5^n`, bounded to
/// [0, 1] and monotone in `n`.
fn confidence_for(sources: usize) -> f64 {
    1.0 - 0.5_f64.powi(sources as i32)
}

/// Canonicalize an email for matching: lower-case, strip `+alias` suffixes,
/// and normalize Gmail's dot-insensitive local parts and googlemail domain.
pub fn canonicalize_email(email: &str) -> String {
    let trimmed = email.trim().to_ascii_lowercase();
    let Some((local, domain)) = trimmed.split_once('@') else {
        return trimmed;
    };

    let mut local = match local.split_once('+') {
        Some((base, _alias)) => base.to_string(),
        None => local.to_string(),
    };

    let domain = if domain == "googlemail.com" {
        "gmail.com"
    } else {
        domain
    };
    if domain == "gmail.com" {
        local.retain(|c| c != '.');
    }

    format!("{local}@{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::Stores;

    fn resolver(stores: &Stores) -> IdentityResolver {
        IdentityResolver::new(stores.identities.clone(), IdentityConfig::default())
    }

    #[test]
    fn canonicalization_normalizes_aliases_and_gmail() {
        assert_eq!(canonicalize_email("Ada.Lovelace@Example.COM"), "ada.lovelace@example.com");
        assert_eq!(canonicalize_email("ada+work@example.com"), "ada@example.com");
        assert_eq!(canonicalize_email("a.d.a@gmail.com"), "ada@gmail.com");
        assert_eq!(canonicalize_email("ada@googlemail.com"), "ada@gmail.com");
        assert_eq!(canonicalize_email("A.d.a+x@GoogleMail.com"), "ada@gmail.com");
    }

    #[test]
    fn confidence_is_monotone_and_bounded() {
        let mut previous = 0.0;
        for n in 1..=10 {
            let c = confidence_for(n);
            assert!(c > previous);
            assert!((0.0..=1.0).contains(&c));
            previous = c;
        }
    }

    #[tokio::test]
    async fn first_observation_creates_pending_review() {
        let stores = Stores::in_memory();
        let resolver = resolver(&stores);

        let mapping = resolver
            .resolve("okta", "00u1", "Ada@Example.com")
            .await
            .unwrap();
        assert_eq!(mapping.status, MappingStatus::PendingReview);
        assert_eq!(mapping.email_canonical, "ada@example.com");
        assert_eq!(mapping.email_raw, "Ada@Example.com");
        assert!((mapping.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn corroborating_source_raises_confidence_and_promotes() {
        let stores = Stores::in_memory();
        let resolver = resolver(&stores);

        resolver.resolve("okta", "00u1", "ada@example.com").await.unwrap();
        let mapping = resolver
            .resolve("workday", "W-42", "ada@example.com")
            .await
            .unwrap();

        assert_eq!(mapping.external_mappings.len(), 2);
        assert!((mapping.confidence - 0.75).abs() < 1e-9);
        assert_eq!(mapping.status, MappingStatus::Active);
    }

    #[tokio::test]
    async fn contradicting_high_confidence_source_conflicts_not_overwrites() {
        let stores = Stores::in_memory();
        let resolver = resolver(&stores);

        resolver.resolve("okta", "00u1", "ada@example.com").await.unwrap();
        resolver.resolve("workday", "W-42", "ada@example.com").await.unwrap();
        // Third source pushes confidence past the conflict threshold.
        resolver.resolve("intune", "dev-9", "ada@example.com").await.unwrap();

        let mapping = resolver
            .resolve("okta", "00u2", "ada@example.com")
            .await
            .unwrap();
        assert_eq!(mapping.status, MappingStatus::Conflicted);
        let conflict = mapping.conflict_resolution.expect("conflict recorded");
        assert_eq!(conflict.field, "external_id");
        assert_eq!(conflict.existing.value, "00u1");
        assert_eq!(conflict.incoming.value, "00u2");
        // The held value is untouched.
        assert_eq!(mapping.external_mappings["okta"], "00u1");
    }

    #[tokio::test]
    async fn same_external_id_two_emails_conflicts_the_holder() {
        let stores = Stores::in_memory();
        let resolver = resolver(&stores);

        resolver.resolve("okta", "00u1", "ada@example.com").await.unwrap();
        resolver
            .resolve("okta", "00u1", "grace@example.com")
            .await
            .unwrap();

        let holder = stores
            .identities
            .get_by_canonical_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holder.status, MappingStatus::Conflicted);
        let conflict = holder.conflict_resolution.expect("conflict recorded");
        assert_eq!(conflict.field, "email");
        assert_eq!(conflict.existing.value, "ada@example.com");
        assert_eq!(conflict.incoming.value, "grace@example.com");
    }

    #[tokio::test]
    async fn reconfirmation_updates_verification_without_duplicating_sources() {
        let stores = Stores::in_memory();
        let resolver = resolver(&stores);

        let first = resolver.resolve("okta", "00u1", "ada@example.com").await.unwrap();
        let second = resolver.resolve("okta", "00u1", "ada@example.com").await.unwrap();

        assert_eq!(second.external_mappings.len(), 1);
        assert_eq!(first.id, second.id);
        assert!(second.confidence >= first.confidence);
    }
}
