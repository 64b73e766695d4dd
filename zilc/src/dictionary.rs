//! Dictionary collection (spec.md §3 "Dictionary entry"). Canonical
//! keys are truncated/padded to `DICTIONARY_WORD_CHARS` and sorted
//! ascending by encoded key at layout time; this module only owns
//! word collection and deduplication, since the encoded sort key
//! depends on the text encoder (`crate::text`).

use std::collections::HashMap;

use zmachine_isa::constants::DICTIONARY_WORD_CHARS;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DictionaryEntry {
    pub canonical: String,
    pub part_of_speech: u8,
    pub verb_number: Option<u8>,
    pub preaction_routine: Option<String>,
}

#[derive(Default)]
pub struct DictionaryTable {
    by_key: HashMap<String, usize>,
    entries: Vec<DictionaryEntry>,
}

fn truncate_key(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let mut chars: Vec<char> = lower.chars().take(DICTIONARY_WORD_CHARS).collect();
    while chars.len() < DICTIONARY_WORD_CHARS {
        chars.push(' ');
    }
    chars.into_iter().collect()
}

impl DictionaryTable {
    pub fn new() -> DictionaryTable {
        DictionaryTable::default()
    }

    /// Interns `word`, returning its index into `entries()`. Multiple
    /// source words sharing the same 6-character truncated key (e.g.
    /// `NORTHEAST`/`NORTHERLY`) collapse onto one dictionary entry,
    /// matching the target VM's fixed-width lookup.
    pub fn intern(&mut self, word: &str) -> usize {
        let key = truncate_key(word);
        if let Some(&index) = self.by_key.get(&key) {
            return index;
        }
        let index = self.entries.len();
        self.by_key.insert(key.clone(), index);
        self.entries.push(DictionaryEntry {
            canonical: key,
            part_of_speech: 0,
            verb_number: None,
            preaction_routine: None,
        });
        index
    }

    /// Looks up an already-interned word without adding it, the
    /// read-only counterpart to [`intern`](Self::intern) that
    /// `zimage` uses to resolve grammar-rule verbs/prepositions to
    /// dictionary indices once every word has been collected.
    pub fn find(&self, word: &str) -> Option<usize> {
        self.by_key.get(&truncate_key(word)).copied()
    }

    pub fn set_part_of_speech(&mut self, index: usize, flags: u8) {
        self.entries[index].part_of_speech |= flags;
    }

    pub fn set_verb(&mut self, index: usize, verb_number: u8, preaction_routine: Option<String>) {
        self.entries[index].verb_number = Some(verb_number);
        self.entries[index].preaction_routine = preaction_routine;
    }

    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_words_are_space_padded() {
        let mut t = DictionaryTable::new();
        let i = t.intern("go");
        assert_eq!(t.entries()[i].canonical, "go    ");
    }

    #[test]
    fn long_words_truncate_and_collapse() {
        let mut t = DictionaryTable::new();
        let a = t.intern("northeast");
        let b = t.intern("northern");
        assert_eq!(a, b);
        assert_eq!(t.entries()[a].canonical, "northe");
    }

    #[test]
    fn words_are_lowercased() {
        let mut t = DictionaryTable::new();
        let a = t.intern("NORTH");
        let b = t.intern("north");
        assert_eq!(a, b);
    }
}
