//! Placeholder resolution
//!
//! Once the secret is published, every pending `valueFrom` locator gets the
//! real reference in place of the placeholder token.

use crate::document::{DocumentStore, SECRETS};
use crate::secret::{Placeholder, SecretReference};
use serde_json::Value;
use tracing::{info, warn};

/// Substitute `reference` into every pending locator; returns how many changed
pub fn resolve_placeholders(store: &mut DocumentStore, reference: &SecretReference) -> usize {
    let mut resolved = 0;

    for document in store.iter_mut() {
        let id = document.id().clone();
        let containers = match document.containers_mut() {
            Ok(containers) => containers,
            Err(e) => {
                warn!(document = %id, error = %e, "cannot resolve placeholders in malformed task definition");
                continue;
            }
        };

        for container in containers {
            let Some(Value::Array(secrets)) = container.get_mut(SECRETS) else {
                continue;
            };

            for secret in secrets.iter_mut() {
                let Some(Value::String(locator)) = secret.get_mut("valueFrom") else {
                    continue;
                };
                if let Some(updated) = Placeholder::resolve(locator, reference) {
                    *locator = updated;
                    resolved += 1;
                }
            }
        }
    }

    info!(locators = resolved, "resolved secret placeholders");
    resolved
}
