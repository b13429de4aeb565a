//! Registering the fleet and its users
//!
//! The hub loads an optional inventory (nodes, devices, sensors, ranges,
//! users) from its configuration at startup and makes sure an administrator
//! exists. Passwords are only ever stored as Argon2id PHC strings.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use tracing::{info, instrument, warn};

use crate::User;
use crate::config::{Inventory, UserConfig};
use crate::storage::{StorageBackend, StorageError};

pub const MIN_PASSWORD_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(
        "password for {username} is too weak: at least {} characters required",
        MIN_PASSWORD_LEN
    )]
    WeakPassword { username: String },

    #[error("failed to hash password: {0}")]
    Hash(argon2::password_hash::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<argon2::password_hash::Error> for ProvisionError {
    fn from(e: argon2::password_hash::Error) -> Self {
        ProvisionError::Hash(e)
    }
}

/// Hash a plaintext password with Argon2id and a random salt
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Check a plaintext password against a stored PHC string
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn validate_password_strength(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
}

/// Turn a configured user into a storable one
pub fn user_from_config(config: &UserConfig) -> Result<User, ProvisionError> {
    if !validate_password_strength(&config.password) {
        return Err(ProvisionError::WeakPassword {
            username: config.username.clone(),
        });
    }

    Ok(User {
        username: config.username.clone(),
        email: config.email.clone(),
        group: config.group.clone(),
        password_hash: hash_password(&config.password)?,
    })
}

/// What [`seed_inventory`] registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub devices: usize,
    pub nodes: usize,
    pub sensors: usize,
    pub ranges: usize,
    pub users: usize,
    /// Entries that could not be registered
    pub rejected: usize,
}

/// Register every inventory entry
///
/// Devices go first so sensors and ranges can reference them. A failing
/// entry is logged and skipped; it never stops the rest.
#[instrument(skip_all)]
pub async fn seed_inventory(store: &dyn StorageBackend, inventory: &Inventory) -> SeedSummary {
    let mut summary = SeedSummary::default();

    for device in &inventory.devices {
        match store.upsert_device(device).await {
            Ok(()) => summary.devices += 1,
            Err(e) => reject(&mut summary, "device", device.id, &e),
        }
    }

    for node in &inventory.nodes {
        match store.upsert_node(node).await {
            Ok(()) => summary.nodes += 1,
            Err(e) => reject(&mut summary, "node", node.id, &e),
        }
    }

    for sensor in &inventory.sensors {
        match store.upsert_sensor(sensor).await {
            Ok(()) => summary.sensors += 1,
            Err(e) => reject(&mut summary, "sensor", sensor.id, &e),
        }
    }

    for range in &inventory.ranges {
        match store.upsert_range(range).await {
            Ok(()) => summary.ranges += 1,
            Err(e) => reject(&mut summary, "range for device", range.device, &e),
        }
    }

    for user in &inventory.users {
        match add_user(store, user).await {
            Ok(()) => summary.users += 1,
            Err(e) => {
                warn!("skipping user {}: {e}", user.username);
                summary.rejected += 1;
            }
        }
    }

    info!(
        "inventory registered: {} devices, {} nodes, {} sensors, {} ranges, {} users ({} rejected)",
        summary.devices,
        summary.nodes,
        summary.sensors,
        summary.ranges,
        summary.users,
        summary.rejected
    );

    summary
}

fn reject(summary: &mut SeedSummary, what: &str, id: i64, e: &StorageError) {
    warn!("skipping {what} {id}: {e}");
    summary.rejected += 1;
}

async fn add_user(store: &dyn StorageBackend, config: &UserConfig) -> Result<(), ProvisionError> {
    let user = user_from_config(config)?;
    store.insert_user(&user).await?;
    Ok(())
}

/// Create the administrator if the store has no users yet
///
/// Returns whether a user was created. Without operator-supplied
/// credentials no account is made up.
#[instrument(skip_all)]
pub async fn ensure_admin(
    store: &dyn StorageBackend,
    admin: Option<&UserConfig>,
) -> Result<bool, ProvisionError> {
    if store.count_users().await? > 0 {
        return Ok(false);
    }

    let Some(admin) = admin else {
        warn!("no users registered and no administrator configured; alerts have no recipients");
        return Ok(false);
    };

    add_user(store, admin).await?;
    info!("created administrator {} in group {}", admin.username, admin.group);
    Ok(true)
}
