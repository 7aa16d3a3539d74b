use tipguard_core::crypto::generate_salt;
use tipguard_core::SymmetricKey;

use crate::security::generate_admin_secret;

pub fn handle_gen_key() -> anyhow::Result<()> {
    let key = SymmetricKey::generate()?;
    println!("{}", key.to_base64());
    Ok(())
}

pub fn handle_admin_secret(length: usize) -> anyhow::Result<()> {
    let secret = generate_admin_secret(length)?;
    println!("{}", secret.as_str());
    Ok(())
}

pub fn handle_gen_salt() -> anyhow::Result<()> {
    println!("{}", generate_salt()?.to_base64());
    Ok(())
}
