// Human-checkable fingerprint formatting
//
// A fingerprint is displayed as `[aa:bb:..](word word ..)`: every byte in
// colon-separated hex, followed by the first ten bytes spelled as five
// pronounceable words. The word list holds 65536 entries, one per 16-bit
// value, so encoding and decoding are exact inverses.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Number of leading bytes spelled out as words
pub const WORD_BYTES: usize = 10;

const ONSETS: [char; 16] = [
    'b', 'd', 'f', 'g', 'h', 'j', 'k', 'l', 'm', 'n', 'p', 'r', 's', 't', 'v', 'z',
];
const VOWELS: [char; 4] = ['a', 'e', 'i', 'o'];
const CODAS: [char; 4] = ['k', 'n', 'r', 's'];

static DICTIONARY: LazyLock<Dictionary> = LazyLock::new(Dictionary::build);

/// Bidirectional map between 16-bit values and words
struct Dictionary {
    words: Vec<String>,
    values: HashMap<String, u16>,
}

impl Dictionary {
    fn build() -> Self {
        let mut words = Vec::with_capacity(1 << 16);
        let mut values = HashMap::with_capacity(1 << 16);

        for value in 0..=u16::MAX {
            let [high, low] = value.to_be_bytes();
            let word = format!("{}{}", syllable(high), syllable(low));
            values.insert(word.clone(), value);
            words.push(word);
        }

        Self { words, values }
    }
}

/// Three-letter syllable for one byte: onset, vowel, coda
pub fn syllable(byte: u8) -> String {
    let onset = ONSETS[(byte >> 4) as usize];
    let vowel = VOWELS[((byte >> 2) & 0x3) as usize];
    let coda = CODAS[(byte & 0x3) as usize];
    [onset, vowel, coda].iter().collect()
}

/// SHA-256 digest of raw bytes (used for certificates and public keys)
pub fn digest(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Spell bytes as space-separated words, two bytes per word.
///
/// A trailing odd byte is spelled as the high half of a word with a zero low
/// half.
pub fn encode_words(bytes: &[u8]) -> String {
    bytes
        .chunks(2)
        .map(|pair| {
            let value = u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
            DICTIONARY.words[value as usize].as_str()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turn words back into bytes. Returns `None` if any word is unknown.
pub fn decode_words(words: &str) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    for word in words.split_whitespace() {
        let value = DICTIONARY.values.get(word)?;
        out.extend_from_slice(&value.to_be_bytes());
    }
    Some(out)
}

/// Colon-separated lowercase hex
pub fn hex_colons(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Full display form of an already-hashed fingerprint
pub fn format(fingerprint: &[u8]) -> String {
    let spelled = &fingerprint[..fingerprint.len().min(WORD_BYTES)];
    format!("[{}]({})", hex_colons(fingerprint), encode_words(spelled))
}

/// Hash raw data and format the digest
pub fn format_digest(data: &[u8]) -> String {
    format(&digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_dictionary_is_a_bijection() {
        assert_eq!(DICTIONARY.words.len(), 65536);
        assert_eq!(DICTIONARY.values.len(), 65536);

        for (value, word) in DICTIONARY.words.iter().enumerate() {
            assert_eq!(DICTIONARY.values[word] as usize, value);
            assert_eq!(word.len(), 6);
        }
    }

    #[test]
    fn test_every_pair_round_trips() {
        for value in 0..=u16::MAX {
            let bytes = value.to_be_bytes();
            assert_eq!(decode_words(&encode_words(&bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn test_random_ten_byte_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let mut bytes = [0u8; WORD_BYTES];
            rng.fill_bytes(&mut bytes);

            let words = encode_words(&bytes);
            assert_eq!(words.split(' ').count(), 5);
            assert_eq!(decode_words(&words).unwrap(), bytes);
        }
    }

    #[test]
    fn test_word_order_is_big_endian() {
        assert_eq!(encode_words(&[0x00, 0x01]), format!("{}{}", syllable(0), syllable(1)));
        assert_ne!(encode_words(&[0x00, 0x01]), encode_words(&[0x01, 0x00]));
    }

    #[test]
    fn test_decode_rejects_unknown_word() {
        assert!(decode_words("bakbak notaword").is_none());
    }

    #[test]
    fn test_format_layout() {
        let fp: Vec<u8> = (0u8..32).collect();
        let shown = format(&fp);

        assert!(shown.starts_with("[00:01:02:"));
        assert!(shown.contains("1e:1f]("));
        assert!(shown.ends_with(')'));

        let words = shown.split_once('(').unwrap().1.trim_end_matches(')');
        assert_eq!(decode_words(words).unwrap(), fp[..WORD_BYTES].to_vec());
    }

    #[test]
    fn test_format_short_input() {
        assert_eq!(format(&[0xab]), format!("[ab]({}bak)", syllable(0xab)));
    }
}
