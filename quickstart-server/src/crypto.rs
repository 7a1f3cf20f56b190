use bcrypt::BcryptResult;

pub use bcrypt::DEFAULT_COST;

/// One-way salted hash of a plaintext password.
pub fn hash_password(plain: &str, cost: u32) -> BcryptResult<String> {
    bcrypt::hash(plain, cost)
}
