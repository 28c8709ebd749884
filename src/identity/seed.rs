//! BIP39 mnemonic handling for client wallets

use super::IdentityError;
use bip39::Mnemonic;

/// Wrapper around a BIP39 mnemonic
pub struct SeedPhrase {
    mnemonic: Mnemonic,
}

impl SeedPhrase {
    /// Generate a new random seed phrase with the given word count
    pub fn generate(word_count: usize) -> Result<Self, IdentityError> {
        let entropy_bits = match word_count {
            12 => 128,
            15 => 160,
            18 => 192,
            21 => 224,
            24 => 256,
            _ => {
                return Err(IdentityError::InvalidSeedPhrase(
                    "Word count must be 12, 15, 18, 21, or 24".to_string(),
                ))
            }
        };

        let mut entropy = vec![0u8; entropy_bits / 8];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut entropy);

        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| IdentityError::InvalidSeedPhrase(e.to_string()))?;

        Ok(Self { mnemonic })
    }

    /// Parse an existing seed phrase, tolerating irregular whitespace
    pub fn from_phrase(phrase: &str) -> Result<Self, IdentityError> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");

        let mnemonic = Mnemonic::parse_normalized(&normalized)
            .map_err(|e| IdentityError::InvalidSeedPhrase(e.to_string()))?;

        Ok(Self { mnemonic })
    }

    /// Convert to seed bytes (512 bits) using optional passphrase
    pub fn to_seed(&self, passphrase: &str) -> [u8; 64] {
        self.mnemonic.to_seed(passphrase)
    }

    pub fn phrase(&self) -> String {
        self.mnemonic.to_string()
    }

    pub fn word_count(&self) -> usize {
        self.mnemonic.word_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_seed_phrase() {
        let seed = SeedPhrase::generate(12).unwrap();
        assert_eq!(seed.word_count(), 12);
        assert!(SeedPhrase::generate(10).is_err());
    }

    #[test]
    fn test_seed_phrase_recovery() {
        let seed1 = SeedPhrase::generate(24).unwrap();
        let seed2 = SeedPhrase::from_phrase(&seed1.phrase()).unwrap();

        assert_eq!(seed1.to_seed("password"), seed2.to_seed("password"));
        assert_ne!(seed1.to_seed(""), seed1.to_seed("password"));
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let spaced = KNOWN.replace(' ', "   ");
        let a = SeedPhrase::from_phrase(KNOWN).unwrap();
        let b = SeedPhrase::from_phrase(&format!("  {spaced}\n")).unwrap();
        assert_eq!(a.to_seed(""), b.to_seed(""));
        assert!(SeedPhrase::from_phrase("invalid phrase here").is_err());
    }
}
