//! Text encoder (spec.md §4.F): 5-bit alphabet compression, z-char
//! packing, and abbreviation selection.

use std::collections::HashMap;

use zmachine_isa::alphabet::{
    find_in_alphabet, ZCHAR_ABBREV_0, ZCHAR_ABBREV_32, ZCHAR_ABBREV_64, ZCHAR_SHIFT_A1, ZCHAR_SHIFT_A2, ZCHAR_SPACE,
};

/// Encodes `text` into a z-char stream, substituting any matching
/// abbreviation (longest-match-first, scanned left to right) before
/// falling back to per-character encoding.
pub fn encode_zchars(text: &str, abbreviations: &[String]) -> Vec<u8> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    // Longest abbreviations first so a longer match always wins over
    // a shorter one that happens to start at the same position.
    let mut by_length: Vec<(usize, &String)> = abbreviations.iter().enumerate().map(|(i, a)| (i, a)).collect();
    by_length.sort_by_key(|(_, a)| std::cmp::Reverse(a.chars().count()));

    'outer: while i < chars.len() {
        for (index, abbrev) in &by_length {
            let abbrev_chars: Vec<char> = abbrev.chars().collect();
            if abbrev_chars.is_empty() || i + abbrev_chars.len() > chars.len() {
                continue;
            }
            if chars[i..i + abbrev_chars.len()] == abbrev_chars[..] {
                push_abbreviation(&mut out, *index);
                i += abbrev_chars.len();
                continue 'outer;
            }
        }
        push_char(&mut out, chars[i]);
        i += 1;
    }
    out
}

fn push_abbreviation(out: &mut Vec<u8>, index: usize) {
    let marker = match index / 32 {
        0 => ZCHAR_ABBREV_0,
        1 => ZCHAR_ABBREV_32,
        _ => ZCHAR_ABBREV_64,
    };
    out.push(marker);
    out.push((index % 32) as u8);
}

fn push_char(out: &mut Vec<u8>, c: char) {
    if c == ' ' {
        out.push(ZCHAR_SPACE);
        return;
    }
    match find_in_alphabet(c) {
        Some((0, zc)) => out.push(zc),
        Some((1, zc)) => {
            out.push(ZCHAR_SHIFT_A1);
            out.push(zc);
        }
        Some((2, zc)) => {
            out.push(ZCHAR_SHIFT_A2);
            out.push(zc);
        }
        Some((_, _)) | None => {
            // Characters outside the alphabet fall back to a ZSCII
            // escape: shift to A2, escape marker, then the character's
            // ZSCII code split into two 5-bit halves.
            out.push(ZCHAR_SHIFT_A2);
            out.push(6);
            let code = c as u32 & 0x3ff;
            out.push(((code >> 5) & 0x1f) as u8);
            out.push((code & 0x1f) as u8);
        }
    }
}

/// Packs a z-char stream into 16-bit words, three z-chars per word,
/// padding the final word with shift-A0 (space) filler and setting
/// the high bit of the last word to mark the string's end.
pub fn pack_zchars(zchars: &[u8]) -> Vec<u16> {
    let mut padded = zchars.to_vec();
    while padded.len() % 3 != 0 {
        padded.push(ZCHAR_SPACE);
    }
    let mut words: Vec<u16> = padded
        .chunks(3)
        .map(|triple| {
            ((triple[0] as u16 & 0x1f) << 10) | ((triple[1] as u16 & 0x1f) << 5) | (triple[2] as u16 & 0x1f)
        })
        .collect();
    if let Some(last) = words.last_mut() {
        *last |= 0x8000;
    } else {
        words.push(0x8000);
    }
    words
}

/// Greedily selects up to `max` abbreviations from `corpus`, scoring
/// each candidate substring by `(occurrences - 1) * (length - 2)`:
/// the first occurrence must still spell the string out in full (to
/// define the abbreviation), every later occurrence saves
/// `length - 2` z-chars by referencing it instead. This is a
/// size-optimization heuristic (spec.md §9 Open Questions: abbreviation
/// selection is optional), not an exhaustive optimal cover.
pub fn select_abbreviations(corpus: &[String], max: usize) -> Vec<String> {
    const MIN_LEN: usize = 2;
    const MAX_LEN: usize = 12;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for s in corpus {
        let chars: Vec<char> = s.chars().collect();
        for len in MIN_LEN..=MAX_LEN.min(chars.len()) {
            for start in 0..=(chars.len() - len) {
                let candidate: String = chars[start..start + len].iter().collect();
                *counts.entry(candidate).or_insert(0) += 1;
            }
        }
    }

    let mut scored: Vec<(String, i64)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(s, count)| {
            let len = s.chars().count() as i64;
            let score = (count as i64 - 1) * (len - 2);
            (s, score)
        })
        .filter(|(_, score)| *score > 0)
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.into_iter().take(max).map(|(s, _)| s).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lowercase_word_roundtrips_through_zchars() {
        let zc = encode_zchars("go", &[]);
        assert_eq!(zc, vec![zmachine_isa::alphabet::find_in_alphabet('g').unwrap().1, zmachine_isa::alphabet::find_in_alphabet('o').unwrap().1]);
    }

    #[test]
    fn space_encodes_as_zchar_zero() {
        let zc = encode_zchars("a b", &[]);
        assert_eq!(zc[1], ZCHAR_SPACE);
    }

    #[test]
    fn packs_three_zchars_per_word_with_end_bit() {
        let words = pack_zchars(&[1, 2, 3]);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0] & 0x8000, 0x8000);
    }

    #[test]
    fn pads_incomplete_final_word() {
        let words = pack_zchars(&[1]);
        assert_eq!(words.len(), 1);
    }

    #[test]
    fn abbreviation_is_substituted_when_present() {
        let abbrevs = vec!["THE ".to_string()];
        let zc = encode_zchars("THE ", &abbrevs);
        assert_eq!(zc.len(), 2);
    }

    #[test]
    fn selects_repeated_substrings_as_abbreviations() {
        let corpus = vec!["THE FOREST".to_string(), "THE LAMP".to_string(), "THE ROCK".to_string()];
        let chosen = select_abbreviations(&corpus, 10);
        assert!(chosen.iter().any(|s| s == "THE "));
    }

    #[test]
    fn abbreviation_budget_is_respected() {
        let corpus: Vec<String> = (0..50).map(|i| format!("REPEATEDPHRASE{}REPEATEDPHRASE", i)).collect();
        let chosen = select_abbreviations(&corpus, 3);
        assert!(chosen.len() <= 3);
    }
}
