use crate::crypto;
use bcrypt::BcryptResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored user profile. `password` only ever holds a bcrypt hash.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub pid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileCreateRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl ProfileCreateRequest {
    /// Builds a profile under a fresh identifier.
    pub fn into_profile(self, cost: u32) -> BcryptResult<Profile> {
        Ok(Profile {
            pid: Uuid::new_v4(),
            password: crypto::hash_password(&self.password, cost)?,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
        })
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub pid: Uuid,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl ProfileUpdateRequest {
    /// Full replacement of the profile; the password is always re-hashed.
    pub fn into_profile(self, cost: u32) -> BcryptResult<Profile> {
        Ok(Profile {
            pid: self.pid,
            password: crypto::hash_password(&self.password, cost)?,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
        })
    }
}
