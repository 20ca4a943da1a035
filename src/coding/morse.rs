//! The International Morse character set.
//! Bidirectional lookup between characters and their dot/dash representations,
//! plus the phonetic alphabet and procedural-sign tables.

use std::sync::OnceLock;

/// No representation in the table is longer than this.
pub const MAX_REPRESENTATION_LENGTH: usize = 7;

/// Character / representation pairs, fixed at compile time.
/// Letters, digits, punctuation, then the single-character procedural signs.
const MORSE_TABLE: &[(char, &str)] = &[
    ('A', ".-"),
    ('B', "-..."),
    ('C', "-.-."),
    ('D', "-.."),
    ('E', "."),
    ('F', "..-."),
    ('G', "--."),
    ('H', "...."),
    ('I', ".."),
    ('J', ".---"),
    ('K', "-.-"),
    ('L', ".-.."),
    ('M', "--"),
    ('N', "-."),
    ('O', "---"),
    ('P', ".--."),
    ('Q', "--.-"),
    ('R', ".-."),
    ('S', "..."),
    ('T', "-"),
    ('U', "..-"),
    ('V', "...-"),
    ('W', ".--"),
    ('X', "-..-"),
    ('Y', "-.--"),
    ('Z', "--.."),
    ('0', "-----"),
    ('1', ".----"),
    ('2', "..---"),
    ('3', "...--"),
    ('4', "....-"),
    ('5', "....."),
    ('6', "-...."),
    ('7', "--..."),
    ('8', "---.."),
    ('9', "----."),
    ('"', ".-..-."),
    ('\'', ".----."),
    ('$', "...-..-"),
    ('(', "-.--."),
    (')', "-.--.-"),
    ('+', ".-.-."),
    (',', "--..--"),
    ('-', "-....-"),
    ('.', ".-.-.-"),
    ('/', "-..-."),
    (':', "---..."),
    (';', "-.-.-."),
    ('=', "-...-"),
    ('?', "..--.."),
    ('@', ".--.-."),
    ('_', "..--.-"),
    ('!', "-.-.--"),
    ('&', ".-..."),
    ('<', "...-.-"),
    ('>', "-...-.-"),
    ('^', "-.-.-"),
    ('~', ".-.-.."),
];

/// Procedural signs: the single character, its two-letter expansion, and
/// whether a display would usually show the expansion rather than the char.
const PROCEDURAL_TABLE: &[(char, &str, bool)] = &[
    ('<', "VA", true),  // end of work
    ('>', "BK", true),  // break
    ('^', "KA", true),  // starting signal
    ('~', "AL", true),  // paragraph
    ('&', "AS", false), // wait
    ('+', "AR", false), // end of message
    ('=', "BT", false), // new section
];

/// NATO phonetic alphabet, indexed by letter.
const PHONETIC_TABLE: [&str; 26] = [
    "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India", "Juliett",
    "Kilo", "Lima", "Mike", "November", "Oscar", "Papa", "Quebec", "Romeo", "Sierra", "Tango",
    "Uniform", "Victor", "Whiskey", "X-ray", "Yankee", "Zulu",
];

/// Hash a representation into an 8-bit value: a leading sentinel `1` bit
/// followed by one bit per element (`.` = 0, `-` = 1). Representations of
/// length 1..=7 hash into [2, 255]; anything else returns `None`.
fn representation_hash(rep: &str) -> Option<u8> {
    if rep.is_empty() || rep.len() > MAX_REPRESENTATION_LENGTH {
        return None;
    }

    let mut hash = 1u8;
    for b in rep.bytes() {
        hash <<= 1;
        match b {
            b'-' => hash |= 1,
            b'.' => {}
            _ => return None,
        }
    }

    Some(hash)
}

/// Reverse lookup array indexed by representation hash, built on first use.
/// A slot holds `\0` when no character has that representation.
fn reverse_table() -> &'static [char; 256] {
    static TABLE: OnceLock<[char; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = ['\0'; 256];
        for &(c, rep) in MORSE_TABLE {
            let hash = representation_hash(rep).expect("table representations are well formed");
            debug_assert_eq!(table[hash as usize], '\0', "duplicate representation");
            table[hash as usize] = c;
        }
        table
    })
}

/// Look up the representation for a character. Case-insensitive.
pub fn character_to_representation(c: char) -> Option<&'static str> {
    let c = c.to_ascii_uppercase();
    MORSE_TABLE.iter().find(|&&(x, _)| x == c).map(|&(_, r)| r)
}

/// Look up the character for a representation.
/// Rejects strings containing anything but `.` and `-` or longer than
/// [`MAX_REPRESENTATION_LENGTH`].
pub fn representation_to_character(rep: &str) -> Option<char> {
    let c = reverse_table()[representation_hash(rep)? as usize];
    (c != '\0').then_some(c)
}

/// Whether the character can be sent as Morse.
pub fn character_is_valid(c: char) -> bool {
    character_to_representation(c).is_some()
}

/// Whether every character of the string is sendable. Spaces are allowed,
/// they separate words.
pub fn string_is_valid(s: &str) -> bool {
    s.chars().all(|c| c == ' ' || character_is_valid(c))
}

/// Whether the string is a well-formed representation. It does not have to
/// map to a character.
pub fn representation_is_valid(rep: &str) -> bool {
    representation_hash(rep).is_some()
}

/// All sendable characters, in table order.
pub fn list_characters() -> String {
    MORSE_TABLE.iter().map(|&(c, _)| c).collect()
}

pub fn character_count() -> usize {
    MORSE_TABLE.len()
}

/// Look up a procedural sign: its expansion and whether it is usually
/// displayed expanded.
pub fn lookup_procedural(c: char) -> Option<(&'static str, bool)> {
    let c = c.to_ascii_uppercase();
    PROCEDURAL_TABLE
        .iter()
        .find(|&&(x, _, _)| x == c)
        .map(|&(_, expansion, expanded)| (expansion, expanded))
}

/// Look up the phonetic for a letter, e.g. `S` → `"Sierra"`.
pub fn lookup_phonetic(c: char) -> Option<&'static str> {
    let c = c.to_ascii_uppercase();
    c.is_ascii_uppercase()
        .then(|| PHONETIC_TABLE[c as usize - 'A' as usize])
}
