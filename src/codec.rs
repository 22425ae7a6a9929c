use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::config::HasherConfig;

type HmacSha256 = Hmac<Sha256>;

/// Error returned for decode failures.
///
/// Every variant means the same thing to callers: the string was not produced
/// by this converter. The distinction only matters for logging.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("encoded string is empty, oversized or structurally invalid")]
    DecodingFailed,
    #[error("character `{received}` is not part of the hasher alphabet")]
    ForeignCharacter { received: char },
    #[error("decoded value does not fit in 64 bits")]
    Overflow,
    #[error("re-encoding the decoded value did not reproduce the input")]
    RoundTripMismatch,
}

// Hard upper bound on inputs we even attempt to decode. Genuine encodings
// never exceed the configured minimum length plus a handful of digits.
const MAX_ENCODED_LENGTH: usize = 512;

// One guard character is reserved per this many alphabet characters.
const GUARD_DIV: usize = 12;

/// Deterministic byte stream keyed by HMAC-SHA256 over (tweak, counter).
struct ShuffleStream {
    mac: HmacSha256,
    tweak: Vec<u8>,
    block: [u8; 32],
    counter: u64,
    offset: usize,
}

impl ShuffleStream {
    fn new(key: &[u8; 32], tweak: &[u8]) -> ShuffleStream {
        ShuffleStream {
            mac: HmacSha256::new_from_slice(key).expect("Key length 32 should be valid"),
            tweak: tweak.to_vec(),
            block: [0u8; 32],
            counter: 0,
            offset: 32,
        }
    }

    fn next_u64(&mut self) -> u64 {
        if self.offset + 8 > self.block.len() {
            let mut mac = self.mac.clone();
            mac.update(&self.tweak);
            mac.update(&self.counter.to_le_bytes());
            self.block.copy_from_slice(&mac.finalize().into_bytes());
            self.counter += 1;
            self.offset = 0;
        }
        let bytes: [u8; 8] = self.block[self.offset..self.offset + 8]
            .try_into()
            .expect("Slice length 8 should be valid");
        self.offset += 8;
        u64::from_le_bytes(bytes)
    }
}

/// Fisher-Yates shuffle driven by the keyed stream. The same (key, tweak)
/// always yields the same permutation.
fn consistent_shuffle(mut chars: Vec<char>, key: &[u8; 32], tweak: &[u8]) -> Vec<char> {
    let mut stream = ShuffleStream::new(key, tweak);
    for i in (1..chars.len()).rev() {
        let j = (stream.next_u64() % (i as u64 + 1)) as usize;
        chars.swap(i, j);
    }
    chars
}

/// A single encode/decode pair bound to one hasher configuration.
///
/// The transform is an obfuscating permutation, not encryption: the salt keys
/// a deterministic shuffle of the alphabet, the integer is written in the
/// shuffled base, and guard characters pad the result up to the configured
/// minimum length. Decoding reverses the base conversion and then verifies by
/// re-encoding, so strings from a different configuration do not round-trip.
#[derive(Debug)]
pub struct Converter {
    shuffle_key: [u8; 32],
    guards: Vec<char>,
    working: Vec<char>,
    min_length: usize,
    enabled: bool,
}

impl Converter {
    /// Builds a converter from a validated configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use routecloak::{Converter, HasherConfig, RawHasherConfig};
    ///
    /// let config = HasherConfig::from_raw(
    ///     "example",
    ///     &RawHasherConfig::new().with_salt("your-secure-salt"),
    /// )
    /// .unwrap();
    /// let converter = Converter::new(&config);
    /// let encoded = converter.encode(12345);
    /// assert_eq!(converter.decode(&encoded).unwrap(), 12345);
    /// ```
    pub fn new(config: &HasherConfig) -> Converter {
        let hkdf = Hkdf::<Sha256>::new(None, config.salt().as_bytes());
        let mut shuffle_key = [0u8; 32];
        hkdf.expand(b"routecloak/shuffle", &mut shuffle_key)
            .expect("Length 32 should be valid");

        let chars: Vec<char> = config.alphabet().chars().collect();
        let shuffled = consistent_shuffle(chars, &shuffle_key, b"alphabet");
        let guard_count = (shuffled.len() / GUARD_DIV).max(1);
        let guards = shuffled[..guard_count].to_vec();
        let working = shuffled[guard_count..].to_vec();

        Converter {
            shuffle_key,
            guards,
            working,
            min_length: config.min_hash_length(),
            enabled: config.enabled(),
        }
    }

    /// Encodes `num` into an opaque string drawn from the configured alphabet.
    ///
    /// The output is deterministic and at least `min_hash_length` characters
    /// long. A disabled hasher renders the plain decimal representation.
    pub fn encode(&self, num: u64) -> String {
        if !self.enabled {
            return num.to_string();
        }
        let lottery = self.working[(num % self.working.len() as u64) as usize];
        let digit_alphabet = self.digit_alphabet(lottery);

        let mut out = vec![lottery];
        out.extend(to_base(num, &digit_alphabet));
        if out.len() < self.min_length {
            self.pad(&mut out, num);
        }
        out.into_iter().collect()
    }

    /// Decodes a string previously produced by [`Converter::encode`] under the
    /// same configuration.
    ///
    /// Anything else fails: foreign characters, guard layouts this converter
    /// would not produce, values that overflow, and well-formed strings from a
    /// differently salted hasher (caught by the re-encoding check).
    pub fn decode(&self, encoded: &str) -> Result<u64, DecodeError> {
        if !self.enabled {
            return encoded.parse::<u64>().map_err(|_| DecodeError::DecodingFailed);
        }
        let chars: Vec<char> = encoded.chars().collect();
        if chars.is_empty() || chars.len() > MAX_ENCODED_LENGTH {
            return Err(DecodeError::DecodingFailed);
        }

        // Guard characters bracket the payload when padding was applied.
        let pieces: Vec<&[char]> = chars.split(|c| self.guards.contains(c)).collect();
        let core: &[char] = match pieces.len() {
            1 => pieces[0],
            2 | 3 => pieces[1],
            _ => return Err(DecodeError::DecodingFailed),
        };
        if core.len() < 2 {
            return Err(DecodeError::DecodingFailed);
        }

        let lottery = core[0];
        if !self.working.contains(&lottery) {
            return Err(DecodeError::ForeignCharacter { received: lottery });
        }
        let digit_alphabet = self.digit_alphabet(lottery);
        let num = from_base(&core[1..], &digit_alphabet)?;

        // The whole pipeline is deterministic, so a genuine encoding must
        // reproduce itself exactly. This rejects foreign-hasher strings.
        if self.encode(num) != encoded {
            return Err(DecodeError::RoundTripMismatch);
        }
        Ok(num)
    }

    fn digit_alphabet(&self, lottery: char) -> Vec<char> {
        let tweak = (lottery as u32).to_le_bytes();
        consistent_shuffle(self.working.clone(), &self.shuffle_key, &tweak)
    }

    /// Pads `out` up to the minimum length: one guard on each side, then
    /// rounds of shuffled alphabet halves, trimmed back symmetrically.
    fn pad(&self, out: &mut Vec<char>, num: u64) {
        let first = out[0] as usize;
        let guard = self.guards[(num as usize).wrapping_add(first) % self.guards.len()];
        out.insert(0, guard);
        if out.len() >= self.min_length {
            return;
        }
        let guard = self.guards[(num as usize).wrapping_add(out.len()) % self.guards.len()];
        out.push(guard);

        let mut alphabet = self.working.clone();
        let mut round: u64 = 0;
        while out.len() < self.min_length {
            alphabet = consistent_shuffle(alphabet, &self.shuffle_key, &round.to_le_bytes());
            round += 1;
            let half = alphabet.len() / 2;
            let mut padded = alphabet[half..].to_vec();
            padded.extend_from_slice(out);
            padded.extend_from_slice(&alphabet[..half]);
            *out = padded;
            if out.len() > self.min_length {
                let excess = out.len() - self.min_length;
                let start = excess / 2;
                *out = out[start..start + self.min_length].to_vec();
            }
        }
    }
}

// Most significant digit first; zero is a single digit.
fn to_base(mut num: u64, alphabet: &[char]) -> Vec<char> {
    let radix = alphabet.len() as u64;
    let mut digits = Vec::new();
    loop {
        digits.push(alphabet[(num % radix) as usize]);
        num /= radix;
        if num == 0 {
            break;
        }
    }
    digits.reverse();
    digits
}

fn from_base(digits: &[char], alphabet: &[char]) -> Result<u64, DecodeError> {
    let radix = alphabet.len() as u64;
    let mut num: u64 = 0;
    for &c in digits {
        let idx = alphabet
            .iter()
            .position(|&a| a == c)
            .ok_or(DecodeError::ForeignCharacter { received: c })? as u64;
        num = num
            .checked_mul(radix)
            .and_then(|n| n.checked_add(idx))
            .ok_or(DecodeError::Overflow)?;
    }
    Ok(num)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawHasherConfig;
    use rand::{distributions::Uniform, Rng};

    fn converter(raw: RawHasherConfig) -> Converter {
        Converter::new(&HasherConfig::from_raw("test", &raw).unwrap())
    }

    #[test]
    fn test_roundtrip_defaults() {
        let codec = converter(RawHasherConfig::new().with_salt("Test salt here"));
        for num in [0, 1, 2, 123, 4096, u64::MAX] {
            let encoded = codec.encode(num);
            assert_eq!(codec.decode(&encoded).unwrap(), num, "number {}", num);
        }
    }

    #[test]
    fn test_determinism() {
        let codec = converter(RawHasherConfig::new().with_salt("Test salt here"));
        assert_eq!(codec.encode(987654321), codec.encode(987654321));
    }

    #[test]
    fn test_min_length_and_alphabet() {
        let codec = converter(
            RawHasherConfig::new()
                .with_salt("s")
                .with_min_hash_length(24),
        );
        for num in [0, 1, 77, u64::MAX] {
            let encoded = codec.encode(num);
            assert!(encoded.chars().count() >= 24, "too short: {}", encoded);
            assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric()));
            assert_eq!(codec.decode(&encoded).unwrap(), num);
        }
    }

    #[test]
    fn test_tiny_alphabet() {
        let codec = converter(
            RawHasherConfig::new()
                .with_salt("tiny")
                .with_alphabet("abcd")
                .with_min_hash_length(12),
        );
        for num in [0, 1, 255, 1 << 40] {
            let encoded = codec.encode(num);
            assert!(encoded.chars().all(|c| "abcd".contains(c)));
            assert_eq!(codec.decode(&encoded).unwrap(), num);
        }
    }

    #[test]
    fn test_distinct_salts_produce_distinct_encodings() {
        let a = converter(RawHasherConfig::new().with_salt("salt-a"));
        let b = converter(RawHasherConfig::new().with_salt("salt-b"));
        let mut differs = false;
        for num in [1u64, 42, 999, 123456789] {
            if a.encode(num) != b.encode(num) {
                differs = true;
            }
            // A foreign-salt string must not silently decode to the same id.
            if let Ok(decoded) = b.decode(&a.encode(num)) {
                assert_ne!(decoded, num);
            }
        }
        assert!(differs);
    }

    #[test]
    fn test_disabled_hasher_is_identity() {
        let codec = converter(RawHasherConfig::new().with_salt("s").with_enabled(false));
        assert_eq!(codec.encode(123), "123");
        assert_eq!(codec.decode("123").unwrap(), 123);
        assert_eq!(codec.decode("x23"), Err(DecodeError::DecodingFailed));
    }

    #[test]
    fn test_decode_errors() {
        let codec = converter(RawHasherConfig::new().with_salt("Test salt here"));

        assert_eq!(codec.decode(""), Err(DecodeError::DecodingFailed));
        assert_eq!(
            codec.decode("!!!"),
            Err(DecodeError::ForeignCharacter { received: '!' })
        );
        assert_eq!(
            codec.decode(&"a".repeat(MAX_ENCODED_LENGTH + 1)),
            Err(DecodeError::DecodingFailed)
        );

        // Tampering with one character must never yield the original id.
        let encoded = codec.encode(123);
        let mut chars: Vec<char> = encoded.chars().collect();
        let last = *chars.last().unwrap();
        let replacement = "abcdefghijklmnopqrstuvwxyz"
            .chars()
            .find(|&c| c != last)
            .unwrap();
        *chars.last_mut().unwrap() = replacement;
        let tampered: String = chars.into_iter().collect();
        if let Ok(decoded) = codec.decode(&tampered) {
            assert_ne!(decoded, 123);
        }
    }

    #[test]
    fn test_random_roundtrips() {
        let codec = converter(
            RawHasherConfig::new()
                .with_salt("Test salt here")
                .with_min_hash_length(11),
        );
        let mut rng = rand::thread_rng();
        let range = Uniform::new_inclusive(0u64, u64::MAX);

        for _ in 0..10_000 {
            let number = rng.sample(range);
            let encoded = codec.encode(number);
            let decoded = codec.decode(&encoded).expect("Decoding failed");
            assert_eq!(decoded, number, "Failed at number: {}", number);
        }
    }
}
