//! Index setup: the TTL index reconciliation and declared indexes

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::errors::CollectionResult;
use super::options::IndexSpec;
use crate::store::{IndexModel, IndexOptions, StoreCollection};

/// Insert-time timestamp the TTL index expires on
pub const TTL_FIELD: &str = "_ttl_timestamp";

/// What reconciliation did to the TTL index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlAction {
    Created,
    Recreated,
    Unchanged,
}

/// The TTL index for a lifetime in milliseconds
pub fn ttl_index(ttl_ms: u64) -> IndexModel {
    let mut keys = Map::new();
    keys.insert(TTL_FIELD.into(), Value::from(1));
    IndexModel::new(
        keys,
        IndexOptions {
            expire_after_seconds: Some(ttl_ms / 1000),
            ..Default::default()
        },
    )
}

/// Make the store's TTL index match `ttl_ms`
///
/// Creates the index when missing and recreates it when its expiry differs.
/// An index that already matches is left alone.
pub(crate) async fn setup_ttl(
    handle: &dyn StoreCollection,
    ttl_ms: u64,
) -> CollectionResult<TtlAction> {
    let wanted = ttl_index(ttl_ms);
    let expire = wanted.options.expire_after_seconds;

    let existing = handle
        .list_indexes()
        .await?
        .into_iter()
        .find(|index| index.covers(TTL_FIELD));

    let action = match existing {
        None => {
            handle.create_index(&wanted).await?;
            TtlAction::Created
        }
        Some(index) if index.expire_after_seconds != expire => {
            handle.drop_index(&index.name).await?;
            handle.create_index(&wanted).await?;
            TtlAction::Recreated
        }
        Some(_) => TtlAction::Unchanged,
    };

    match action {
        TtlAction::Unchanged => debug!(collection = handle.name(), "ttl index up to date"),
        _ => info!(
            collection = handle.name(),
            expire_after_seconds = ?expire,
            ?action,
            "ttl index reconciled"
        ),
    }
    Ok(action)
}

/// Create a declared index, dropping a same-named one first when forced
pub(crate) async fn create_index(
    handle: &dyn StoreCollection,
    spec: &IndexSpec,
) -> CollectionResult<String> {
    let model = spec.to_model()?;

    if spec.forced {
        let name = model.name();
        match handle.drop_index(&name).await {
            Ok(()) => debug!(collection = handle.name(), index = %name, "dropped index before recreate"),
            Err(e) if e.is_index_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let name = handle.create_index(&model).await?;
    debug!(collection = handle.name(), index = %name, "index ensured");
    Ok(name)
}
