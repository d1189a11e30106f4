use data_encoding::HEXLOWER;
use rand::Rng;
use totp_rs::{Algorithm, TOTP};

use super::rng::get_crypto_rng;
use crate::{BastionError, Secret};

pub type OtpExposedSecretKey = Vec<u8>;
pub type OtpSecretKey = Secret<OtpExposedSecretKey>;

const OTP_DIGITS: usize = 6;
const OTP_SKEW: u8 = 1;
const OTP_STEP: u64 = 30;

pub fn generate_key() -> OtpSecretKey {
    Secret::new(get_crypto_rng().gen::<[u8; 20]>().to_vec())
}

/// `otpauth://` URI for authenticator apps. `label` must not contain `:`.
pub fn generate_setup_url(
    key: &OtpSecretKey,
    issuer: &str,
    label: &str,
) -> Result<Secret<String>, BastionError> {
    let totp = get_totp(key, Some(issuer.to_owned()), label.to_owned())?;
    Ok(Secret::new(totp.get_url()))
}

fn get_totp(
    key: &OtpSecretKey,
    issuer: Option<String>,
    label: String,
) -> Result<TOTP, BastionError> {
    TOTP::new(
        Algorithm::SHA1,
        OTP_DIGITS,
        OTP_SKEW,
        OTP_STEP,
        key.expose_secret().clone(),
        issuer,
        label,
    )
    .map_err(|e| BastionError::Otp(e.to_string()))
}

pub fn verify_totp(code: &str, key: &OtpSecretKey) -> bool {
    match get_totp(key, None, "bastion".to_owned()) {
        Ok(totp) => totp.check_current(code).unwrap_or(false),
        Err(_) => false,
    }
}

/// Code for the current time step. Used by enrollment tooling and tests.
pub fn current_code(key: &OtpSecretKey) -> Result<String, BastionError> {
    get_totp(key, None, "bastion".to_owned())?
        .generate_current()
        .map_err(|e| BastionError::Otp(e.to_string()))
}

/// Backup codes look like `3f9a1-c0b27`.
pub fn generate_backup_codes(count: usize) -> Vec<Secret<String>> {
    let mut rng = get_crypto_rng();
    (0..count)
        .map(|_| {
            let raw = HEXLOWER.encode(&rng.gen::<[u8; 5]>());
            Secret::new(format!("{}-{}", &raw[..5], &raw[5..]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_code_verifies() {
        let key = generate_key();
        let code = current_code(&key).unwrap();
        assert_eq!(code.len(), OTP_DIGITS);
        assert!(verify_totp(&code, &key));
        assert!(!verify_totp("not-a-code", &key));
    }

    #[test]
    fn test_setup_url_is_otpauth() {
        let key = generate_key();
        let url = generate_setup_url(&key, "Bastion", "alice@example.com").unwrap();
        assert!(url.expose_secret().starts_with("otpauth://totp/"));
        assert!(url.expose_secret().contains("issuer=Bastion"));
    }

    #[test]
    fn test_backup_codes_shape() {
        let codes = generate_backup_codes(10);
        assert_eq!(codes.len(), 10);
        for code in &codes {
            let code = code.expose_secret();
            assert_eq!(code.len(), 11);
            assert_eq!(&code[5..6], "-");
        }
    }
}
