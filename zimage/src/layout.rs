//! Lays a compiled program out into a flat byte image (spec.md §4.H:
//! fixed section order, header written last) and patches every
//! forward reference `zilc` left unresolved — a called routine's
//! packed address, a referenced table's byte address, a placed
//! string's packed address.
//!
//! Grounded in the same "emit into a growing buffer, patch fixups
//! once layout is known" shape as the teacher's `vasm::instructions`
//! two-pass resolver, just run once across the whole image instead of
//! once per routine.

use std::collections::HashMap;
use std::fmt;

use zilc::dictionary::DictionaryEntry;
use zilc::form::FormKind;
use zilc::sema::globals::GlobalInit;
use zilc::sema::grammar::{GrammarRule, SyntaxSlot};
use zilc::sema::objects::ObjectDef;
use zilc::sema::properties::PropertyValue;
use zilc::sema::routines::LocalKind;
use zilc::sema::tables::{ElementWidth, LengthPrefix};
use zilc::sema::SymbolTables;
use zilc::text;
use zilc::CompileOutput;

use zmachine_isa::constants::*;
use zmachine_isa::format::object_entry;

use crate::header::{self, HeaderValues};

/// Everything about a build that isn't derivable from the compiled
/// program itself: which routine is the game's entry point, and the
/// header fields a real build pipeline stamps in from the outside
/// (release number, build date).
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub entry_routine: String,
    pub release_number: u16,
    pub serial_number: [u8; 6],
}

impl Default for BuildOptions {
    fn default() -> BuildOptions {
        BuildOptions {
            entry_routine: "GO".to_string(),
            release_number: 1,
            serial_number: *b"000000",
        }
    }
}

#[derive(Debug)]
pub enum ImageError {
    /// No routine named `entry_routine` was compiled.
    MissingEntryRoutine(String),
    /// A fixup referenced a routine or table name nothing defines.
    UndefinedReference(String),
    /// The finished image doesn't fit in the packed-address space.
    ImageTooLarge(usize),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImageError::MissingEntryRoutine(name) => write!(f, "no routine named `{}` to use as the entry point", name),
            ImageError::UndefinedReference(name) => write!(f, "reference to undefined routine or table `{}`", name),
            ImageError::ImageTooLarge(size) => {
                write!(f, "image is {} bytes, exceeding the packed-address limit of {} bytes", size, MAX_PACKED_ADDRESS_BYTE)
            }
        }
    }
}

impl std::error::Error for ImageError {}

#[derive(Clone, Debug)]
enum FixupTarget {
    Routine(String),
    Table(String),
    StringId(usize),
}

struct Fixup {
    offset: usize,
    target: FixupTarget,
}

/// Deduplicates encoded strings by their z-char content so the same
/// literal placed at two call sites (an abbreviation definition, a
/// property string) is written to high memory once.
#[derive(Default)]
struct StringPool {
    by_content: HashMap<Vec<u8>, usize>,
    zchars: Vec<Vec<u8>>,
}

impl StringPool {
    fn intern_zchars(&mut self, zchars: Vec<u8>) -> usize {
        if let Some(&id) = self.by_content.get(&zchars) {
            return id;
        }
        let id = self.zchars.len();
        self.by_content.insert(zchars.clone(), id);
        self.zchars.push(zchars);
        id
    }
}

struct EncodedObject {
    bytes: Vec<u8>,
    fixups: Vec<(usize, FixupTarget)>,
}

/// Builds the full image for a compiled program. Assumes `output` is
/// otherwise free of diagnostics, since `zilc::compile` already
/// batches and surfaces those before code generation runs.
pub fn build_image(output: &CompileOutput, options: &BuildOptions) -> Result<Vec<u8>, ImageError> {
    let tables = &output.tables;

    let mut image: Vec<u8> = vec![0u8; HEADER_SIZE];
    let mut fixups: Vec<Fixup> = Vec::new();
    let mut routine_addr: HashMap<String, usize> = HashMap::new();
    let mut table_addr: HashMap<String, usize> = HashMap::new();
    let mut strings = StringPool::default();

    // Abbreviation table: 96 packed-address slots, resolved once the
    // string pool is placed; the definitions themselves are encoded
    // with no abbreviations (a string can't abbreviate itself).
    let abbrev_offset = image.len();
    image.extend(std::iter::repeat(0u8).take(ABBREVIATIONS_TABLE_BYTES));
    let abbrev_string_id: Vec<usize> = output
        .abbreviations
        .iter()
        .map(|a| strings.intern_zchars(text::encode_zchars(a, &[])))
        .collect();

    // Globals: a fixed-size region regardless of how many globals
    // were actually declared, matching the target machine's flat
    // 240-variable window.
    let globals_offset = image.len();
    for init in tables.globals.initial_values() {
        let slot_offset = image.len();
        match init {
            GlobalInit::Word(v) => image.extend_from_slice(&v.to_be_bytes()),
            GlobalInit::TableRef(name) => {
                fixups.push(Fixup { offset: slot_offset, target: FixupTarget::Table(name.clone()) });
                image.extend_from_slice(&[0, 0]);
            }
            GlobalInit::RoutineRef(name) => {
                fixups.push(Fixup { offset: slot_offset, target: FixupTarget::Routine(name.clone()) });
                image.extend_from_slice(&[0, 0]);
            }
        }
    }
    while image.len() < globals_offset + GLOBALS_REGION_BYTES {
        image.push(0);
    }

    // Object table: property defaults, then one entry per object,
    // then every object's property blob back to back.
    let object_table_offset = image.len();
    for default in tables.properties.defaults().iter() {
        image.extend_from_slice(&default.to_be_bytes());
    }
    let entries_offset = image.len();
    let object_count = tables.finalized_objects.len();
    image.extend(std::iter::repeat(0u8).take(object_count * object_entry::ENTRY_BYTES));

    let encoded_objects: Vec<EncodedObject> = tables
        .finalized_objects
        .iter()
        .map(|obj| encode_object_properties(obj, tables, &output.abbreviations, &mut strings))
        .collect();

    let mut running = image.len();
    for (i, obj) in tables.finalized_objects.iter().enumerate() {
        let entry_off = entries_offset + i * object_entry::ENTRY_BYTES;
        let attr_off = entry_off + object_entry::ATTRIBUTES_OFFSET;
        image[attr_off..attr_off + object_entry::ATTRIBUTES_BYTES].copy_from_slice(&attribute_bitfield(&obj.attributes));
        image[entry_off + object_entry::PARENT_OFFSET] = obj.parent.unwrap_or(0) as u8;
        image[entry_off + object_entry::SIBLING_OFFSET] = obj.sibling.unwrap_or(0) as u8;
        image[entry_off + object_entry::CHILD_OFFSET] = obj.child.unwrap_or(0) as u8;
        let prop_off = entry_off + object_entry::PROPERTY_TABLE_ADDRESS_OFFSET;
        image[prop_off..prop_off + 2].copy_from_slice(&(running as u16).to_be_bytes());

        let encoded = &encoded_objects[i];
        for (local_off, target) in &encoded.fixups {
            fixups.push(Fixup { offset: running + local_off, target: target.clone() });
        }
        image.extend_from_slice(&encoded.bytes);
        running += encoded.bytes.len();
    }

    // Tables live in dynamic memory uniformly (see DESIGN.md: no
    // interpreter in this workspace enforces the pure/impure
    // write-protection split, so the distinction is tracked but not
    // acted on at layout time).
    for table in tables.tables.iter() {
        let addr = image.len();
        table_addr.insert(table.name.clone(), addr);
        match table.length_prefix {
            LengthPrefix::None => {}
            LengthPrefix::Byte => image.push(table.values.len() as u8),
            LengthPrefix::Word => image.extend_from_slice(&(table.values.len() as u16).to_be_bytes()),
        }
        for &v in &table.values {
            match table.element_width {
                ElementWidth::Byte => image.push(v as u8),
                ElementWidth::Word => image.extend_from_slice(&(v as u16).to_be_bytes()),
            }
        }
    }
    let static_memory_base = image.len();

    // Grammar: one block per distinct verb number (ascending), each
    // block a rule count followed by each rule's slot list and its
    // action routine's (fixed-up) packed address.
    let grammar_offset = image.len();
    let mut rules_by_verb_number: HashMap<u8, Vec<&GrammarRule>> = HashMap::new();
    for rule in tables.grammar.iter() {
        if let Some(idx) = tables.dictionary.find(&rule.verb) {
            if let Some(number) = tables.dictionary.entries()[idx].verb_number {
                rules_by_verb_number.entry(number).or_insert_with(Vec::new).push(rule);
            }
        }
    }
    let mut verb_numbers: Vec<u8> = rules_by_verb_number.keys().copied().collect();
    verb_numbers.sort_unstable();
    for verb_number in verb_numbers {
        let rules = &rules_by_verb_number[&verb_number];
        image.push(rules.len() as u8);
        for rule in rules.iter() {
            image.push(rule.slots.len() as u8);
            for slot in &rule.slots {
                match slot {
                    SyntaxSlot::Object { attribute_filter } => {
                        image.push(attribute_filter.first().map(|&a| a + 1).unwrap_or(0));
                    }
                    SyntaxSlot::Preposition(word) => {
                        image.push(0xFE);
                        let idx = tables.dictionary.find(word).unwrap_or(0) as u16;
                        image.extend_from_slice(&idx.to_be_bytes());
                    }
                }
            }
            let action_offset = image.len();
            fixups.push(Fixup { offset: action_offset, target: FixupTarget::Routine(rule.action.clone()) });
            image.extend_from_slice(&[0, 0]);
        }
    }

    // Dictionary: separator set, entry shape, count, then entries
    // sorted ascending by encoded key.
    let dictionary_offset = image.len();
    const SEPARATORS: [u8; 3] = [b'.', b',', b'"'];
    image.push(SEPARATORS.len() as u8);
    image.extend_from_slice(&SEPARATORS);
    image.push(DICTIONARY_ENTRY_BYTES as u8);
    image.extend_from_slice(&(tables.dictionary.len() as u16).to_be_bytes());

    let mut keyed: Vec<(usize, [u8; 4])> = tables
        .dictionary
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| (i, dictionary_key(&e.canonical)))
        .collect();
    keyed.sort_by_key(|(_, key)| *key);
    for (idx, key) in keyed {
        let entry: &DictionaryEntry = &tables.dictionary.entries()[idx];
        image.extend_from_slice(&key);
        image.push(entry.part_of_speech);
        image.push(entry.verb_number.unwrap_or(0));
        // Reserved: no pass populates `preaction_routine` yet, so this
        // byte is always zero for now.
        image.push(0);
    }

    if image.len() % 2 != 0 {
        image.push(0);
    }
    let high_memory_base = image.len();

    // High memory: every compiled routine, then the pooled strings.
    for routine in &output.program.routines {
        if image.len() % 2 != 0 {
            image.push(0);
        }
        let routine_start = image.len();
        routine_addr.insert(routine.name.clone(), routine_start);

        image.push(routine.locals_count);
        let def = tables.routines.get(&routine.name);
        for i in 0..routine.locals_count as usize {
            let default = def.and_then(|d| d.locals.get(i)).map(default_local_value).unwrap_or(0);
            image.extend_from_slice(&default.to_be_bytes());
        }

        let code_start = image.len();
        for fixup in &routine.fixups {
            fixups.push(Fixup {
                offset: code_start + fixup.offset,
                target: FixupTarget::Routine(fixup.routine.clone()),
            });
        }
        image.extend_from_slice(&routine.code);
    }

    let string_addrs: Vec<usize> = strings
        .zchars
        .iter()
        .map(|zchars| {
            if image.len() % 2 != 0 {
                image.push(0);
            }
            let start = image.len();
            for word in text::pack_zchars(zchars) {
                image.extend_from_slice(&word.to_be_bytes());
            }
            start
        })
        .collect();

    for (slot, &string_id) in abbrev_string_id.iter().enumerate() {
        let packed = (string_addrs[string_id] / 2) as u16;
        let off = abbrev_offset + slot * 2;
        image[off..off + 2].copy_from_slice(&packed.to_be_bytes());
    }

    if image.len() % 2 != 0 {
        image.push(0);
    }

    let entry_routine_addr = *routine_addr
        .get(&options.entry_routine)
        .ok_or_else(|| ImageError::MissingEntryRoutine(options.entry_routine.clone()))?;

    for fixup in &fixups {
        let value: u16 = match &fixup.target {
            FixupTarget::Routine(name) => {
                let addr = *routine_addr.get(name).ok_or_else(|| ImageError::UndefinedReference(name.clone()))?;
                (addr / 2) as u16
            }
            FixupTarget::Table(name) => {
                let addr = *table_addr.get(name).ok_or_else(|| ImageError::UndefinedReference(name.clone()))?;
                addr as u16
            }
            FixupTarget::StringId(id) => (string_addrs[*id] / 2) as u16,
        };
        image[fixup.offset..fixup.offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    if image.len() > MAX_PACKED_ADDRESS_BYTE as usize {
        return Err(ImageError::ImageTooLarge(image.len()));
    }

    let header_values = HeaderValues {
        release_number: options.release_number,
        high_memory_base: high_memory_base as u16,
        initial_pc: entry_routine_addr as u16,
        dictionary_address: dictionary_offset as u16,
        object_table_address: object_table_offset as u16,
        globals_address: globals_offset as u16,
        static_memory_base: static_memory_base as u16,
        serial_number: options.serial_number,
        abbreviations_address: abbrev_offset as u16,
        file_length_words: (image.len() / 2) as u16,
    };
    header::write_header(&mut image, &header_values);
    header::finalize_checksum(&mut image);

    Ok(image)
}

fn default_local_value(local: &zilc::sema::routines::LocalDef) -> u16 {
    match &local.kind {
        LocalKind::Required => 0,
        LocalKind::Optional(form) | LocalKind::Aux(form) => match &form.kind {
            FormKind::Integer(n) => *n as u16,
            _ => 0,
        },
    }
}

fn attribute_bitfield(attributes: &[u8]) -> [u8; 4] {
    let mut bits: u32 = 0;
    for &a in attributes {
        if a <= MAX_ATTRIBUTE_NUMBER {
            bits |= 1 << (31 - a);
        }
    }
    bits.to_le_bytes()
}

fn dictionary_key(canonical: &str) -> [u8; 4] {
    let words = text::pack_zchars(&text::encode_zchars(canonical, &[]));
    let mut key = [0u8; 4];
    for (i, word) in words.iter().take(DICTIONARY_ENTRY_KEY_WORDS).enumerate() {
        key[i * 2..i * 2 + 2].copy_from_slice(&word.to_be_bytes());
    }
    key
}

/// Encodes one object's property table payload: an optional short
/// name (the real Z-machine's "object text" — printed directly by
/// `D`/`PRINTD`, not stored as a numbered property) followed by its
/// properties in descending numeric order, terminated by a zero byte.
fn encode_object_properties(
    obj: &ObjectDef,
    tables: &SymbolTables,
    abbreviations: &[String],
    strings: &mut StringPool,
) -> EncodedObject {
    let desc_number = tables.properties.number_of("DESC");

    let mut short_name_words: Vec<u16> = Vec::new();
    let mut remaining: Vec<(u8, &PropertyValue)> = Vec::new();
    for (number, value) in &obj.properties {
        if desc_number == Some(*number) {
            if let PropertyValue::StringRef(s) = value {
                short_name_words = text::pack_zchars(&text::encode_zchars(s, abbreviations));
                continue;
            }
        }
        remaining.push((*number, value));
    }
    remaining.sort_by(|a, b| b.0.cmp(&a.0));

    let mut bytes = Vec::new();
    bytes.push(short_name_words.len() as u8);
    for word in &short_name_words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }

    let mut fixups: Vec<(usize, FixupTarget)> = Vec::new();
    for (number, value) in remaining {
        let len = value.byte_len();
        bytes.push((((len - 1) as u8) << 5) | number);
        match value {
            PropertyValue::Word(v) => bytes.extend_from_slice(&v.to_be_bytes()),
            PropertyValue::WordList(words) => {
                for w in words {
                    bytes.extend_from_slice(&w.to_be_bytes());
                }
            }
            PropertyValue::Bytes(raw) => bytes.extend_from_slice(raw),
            PropertyValue::StringRef(s) => {
                let id = strings.intern_zchars(text::encode_zchars(s, abbreviations));
                fixups.push((bytes.len(), FixupTarget::StringId(id)));
                bytes.extend_from_slice(&[0, 0]);
            }
        }
    }
    bytes.push(0);

    EncodedObject { bytes, fixups }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn compile(src: &str) -> CompileOutput {
        zilc::compile(src, "t.zil", &PathBuf::from("."), false).unwrap()
    }

    #[test]
    fn builds_a_hello_world_image() {
        let out = compile(r#"<ROUTINE GO () <TELL "Hello, world!" CR> <QUIT>>"#);
        let image = build_image(&out, &BuildOptions::default()).unwrap();
        assert!(image.len() >= HEADER_SIZE);
        assert_eq!(image[0], PRIMARY_VERSION);
        let checksum = zmachine_isa::format::checksum(&image);
        let stored = u16::from_be_bytes([
            image[zmachine_isa::format::CHECKSUM.offset],
            image[zmachine_isa::format::CHECKSUM.offset + 1],
        ]);
        assert_eq!(checksum, stored);
    }

    #[test]
    fn missing_entry_routine_is_an_error() {
        let out = compile(r#"<ROUTINE OTHER () <RTRUE>>"#);
        let options = BuildOptions { entry_routine: "GO".into(), ..BuildOptions::default() };
        assert!(matches!(build_image(&out, &options), Err(ImageError::MissingEntryRoutine(_))));
    }

    #[test]
    fn initial_pc_points_at_the_entry_routines_header() {
        let out = compile(r#"<ROUTINE GO () <TELL "hi" CR>>"#);
        let image = build_image(&out, &BuildOptions::default()).unwrap();
        let pc = u16::from_be_bytes([
            image[zmachine_isa::format::INITIAL_PC.offset],
            image[zmachine_isa::format::INITIAL_PC.offset + 1],
        ]) as usize;
        // The byte at the entry point is a locals-count byte; GO takes
        // no parameters, so it must be zero.
        assert_eq!(image[pc], 0);
    }

    #[test]
    fn rebuilding_the_same_source_is_deterministic() {
        let src = r#"<ROUTINE GO () <TELL "same every time" CR>>"#;
        let a = build_image(&compile(src), &BuildOptions::default()).unwrap();
        let b = build_image(&compile(src), &BuildOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    // S2: GO calls ADD with two arguments and prints the result.
    #[test]
    fn two_routine_call_compiles_a_call_to_the_callees_packed_address() {
        let src = r#"
            <ROUTINE SUMUP (X Y) <RETURN <+ .X .Y>>>
            <ROUTINE GO () <TELL <SUMUP 3 4> CR>>
        "#;
        let out = compile(src);
        let image = build_image(&out, &BuildOptions::default()).unwrap();

        let sumup = out.program.routines.iter().find(|r| r.name == "SUMUP").unwrap();
        assert!(!sumup.code.is_empty());

        // GO must carry exactly one fixup pointing at SUMUP's packed address.
        let go = out.program.routines.iter().find(|r| r.name == "GO").unwrap();
        assert_eq!(go.fixups.iter().filter(|f| f.routine == "SUMUP").count(), 1);
        assert!(image.len() > HEADER_SIZE);
    }

    // S3: COIN (IN ROOM-A) is wired into ROOM-A's object-tree slot.
    #[test]
    fn object_tree_links_parent_and_child() {
        let src = r#"
            <ROOM ROOM-A (DESC "Room A")>
            <ROOM ROOM-B (DESC "Room B")>
            <OBJECT COIN (IN ROOM-A) (DESC "a coin")>
            <ROUTINE GO () <RTRUE>>
        "#;
        let out = compile(src);
        let image = build_image(&out, &BuildOptions::default()).unwrap();

        let room_a = *out.tables.object_numbers.get("ROOM-A").unwrap();
        let coin = *out.tables.object_numbers.get("COIN").unwrap();

        let object_table_address = u16::from_be_bytes([
            image[zmachine_isa::format::OBJECT_TABLE_ADDRESS.offset],
            image[zmachine_isa::format::OBJECT_TABLE_ADDRESS.offset + 1],
        ]) as usize;
        let entries_base = object_table_address + PROPERTY_DEFAULTS_BYTES;

        let room_a_entry = entries_base + (room_a as usize - 1) * object_entry::ENTRY_BYTES;
        let coin_entry = entries_base + (coin as usize - 1) * object_entry::ENTRY_BYTES;

        assert_eq!(image[room_a_entry + object_entry::CHILD_OFFSET], coin as u8);
        assert_eq!(image[coin_entry + object_entry::PARENT_OFFSET], room_a as u8);
        assert_eq!(image[coin_entry + object_entry::SIBLING_OFFSET], 0);
    }

    // S4: FSET-ing attribute 7 on an object sets byte 3 bit 0 of its
    // 32-bit attribute field (bit index 31 - 7 = 24, i.e. byte 3 MSB).
    #[test]
    fn attribute_flag_sets_the_matching_bitfield_bit() {
        let src = r#"<OBJECT THING (FLAGS TAKEBIT OPENBIT PLURALBIT INVISIBLE OPENABLE CONTBIT DOORBIT LIGHTBIT)> <ROUTINE GO () <RTRUE>>"#;
        let out = compile(src);
        let image = build_image(&out, &BuildOptions::default()).unwrap();

        let thing = *out.tables.object_numbers.get("THING").unwrap();
        let object_table_address = u16::from_be_bytes([
            image[zmachine_isa::format::OBJECT_TABLE_ADDRESS.offset],
            image[zmachine_isa::format::OBJECT_TABLE_ADDRESS.offset + 1],
        ]) as usize;
        let entry = object_table_address + PROPERTY_DEFAULTS_BYTES + (thing as usize - 1) * object_entry::ENTRY_BYTES;

        // The 8th declared FLAGS name (LIGHTBIT) was assigned attribute
        // number 7 by declaration order; its bit lives in byte 3 bit 0.
        let attr_number = out.tables.attributes.number_of("LIGHTBIT").unwrap();
        assert_eq!(attr_number, 7);
        let byte = image[entry + object_entry::ATTRIBUTES_OFFSET + 3];
        assert_eq!(byte & 0b0000_0001, 0b0000_0001);
    }

    // S5: TAKE/GET/PICKUP share one verb number and sort ascending by
    // their encoded 4-byte dictionary key.
    #[test]
    fn dictionary_entries_are_sorted_and_share_a_verb_number() {
        let src = r#"<ROUTINE V-TAKE () <RTRUE>> <ROUTINE GO () <RTRUE>> <SYNTAX TAKE OBJECT = V-TAKE> <SYNONYM TAKE GET PICKUP>"#;
        let out = compile(src);
        let image = build_image(&out, &BuildOptions::default()).unwrap();

        let dictionary_address = u16::from_be_bytes([
            image[zmachine_isa::format::DICTIONARY_ADDRESS.offset],
            image[zmachine_isa::format::DICTIONARY_ADDRESS.offset + 1],
        ]) as usize;
        let separator_count = image[dictionary_address] as usize;
        let entry_length = image[dictionary_address + 1 + separator_count] as usize;
        let entry_count = u16::from_be_bytes([
            image[dictionary_address + 2 + separator_count],
            image[dictionary_address + 3 + separator_count],
        ]) as usize;
        assert_eq!(entry_count, 3);

        let entries_base = dictionary_address + 4 + separator_count;
        let mut keys = Vec::new();
        for i in 0..entry_count {
            let off = entries_base + i * entry_length;
            keys.push(&image[off..off + 4]);
        }
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "dictionary entries must already be sorted ascending");
    }
}
