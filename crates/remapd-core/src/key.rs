// Remapd Key Translation Table
// Physical codes, schema key names and output codes, resolved once at load time

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

include!(concat!(env!("OUT_DIR"), "/key_codes.rs"));

/// Errors produced when a key name cannot be resolved
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key name cannot be empty")]
    Empty,

    #[error("unknown key '{name}'{}", format_suggestions(.suggestions))]
    Unknown {
        name: String,
        suggestions: Vec<String>,
    },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

/// Grouping used by diagnostics and `remapctl keys`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum KeyCategory {
    Mouse,
    Modifiers,
    Letters,
    Numbers,
    Function,
    Navigation,
    Editing,
    Symbols,
    Media,
    System,
    Numpad,
}

/// One row of the translation table
#[derive(Debug, Clone, Copy)]
pub struct KeyEntry {
    /// Preferred name used in profiles
    pub schema: &'static str,
    /// Linux input-event-codes.h name
    pub evdev: &'static str,
    pub code: u16,
    pub category: KeyCategory,
}

macro_rules! entries {
    ($($schema:literal, $evdev:literal, $code:literal, $cat:ident;)*) => {
        &[$(KeyEntry { schema: $schema, evdev: $evdev, code: $code, category: KeyCategory::$cat },)*]
    };
}

static KEY_TABLE: &[KeyEntry] = entries! {
    "MOUSE_LEFT", "BTN_LEFT", 272, Mouse;
    "MOUSE_RIGHT", "BTN_RIGHT", 273, Mouse;
    "MOUSE_MIDDLE", "BTN_MIDDLE", 274, Mouse;
    "MOUSE_SIDE", "BTN_SIDE", 275, Mouse;
    "MOUSE_EXTRA", "BTN_EXTRA", 276, Mouse;
    "MOUSE_FORWARD", "BTN_FORWARD", 277, Mouse;
    "MOUSE_BACK", "BTN_BACK", 278, Mouse;
    "MOUSE_TASK", "BTN_TASK", 279, Mouse;

    "CTRL", "KEY_LEFTCTRL", 29, Modifiers;
    "CTRL_R", "KEY_RIGHTCTRL", 97, Modifiers;
    "SHIFT", "KEY_LEFTSHIFT", 42, Modifiers;
    "SHIFT_R", "KEY_RIGHTSHIFT", 54, Modifiers;
    "ALT", "KEY_LEFTALT", 56, Modifiers;
    "ALT_R", "KEY_RIGHTALT", 100, Modifiers;
    "META", "KEY_LEFTMETA", 125, Modifiers;
    "META_R", "KEY_RIGHTMETA", 126, Modifiers;

    "A", "KEY_A", 30, Letters;
    "B", "KEY_B", 48, Letters;
    "C", "KEY_C", 46, Letters;
    "D", "KEY_D", 32, Letters;
    "E", "KEY_E", 18, Letters;
    "F", "KEY_F", 33, Letters;
    "G", "KEY_G", 34, Letters;
    "H", "KEY_H", 35, Letters;
    "I", "KEY_I", 23, Letters;
    "J", "KEY_J", 36, Letters;
    "K", "KEY_K", 37, Letters;
    "L", "KEY_L", 38, Letters;
    "M", "KEY_M", 50, Letters;
    "N", "KEY_N", 49, Letters;
    "O", "KEY_O", 24, Letters;
    "P", "KEY_P", 25, Letters;
    "Q", "KEY_Q", 16, Letters;
    "R", "KEY_R", 19, Letters;
    "S", "KEY_S", 31, Letters;
    "T", "KEY_T", 20, Letters;
    "U", "KEY_U", 22, Letters;
    "V", "KEY_V", 47, Letters;
    "W", "KEY_W", 17, Letters;
    "X", "KEY_X", 45, Letters;
    "Y", "KEY_Y", 21, Letters;
    "Z", "KEY_Z", 44, Letters;

    "1", "KEY_1", 2, Numbers;
    "2", "KEY_2", 3, Numbers;
    "3", "KEY_3", 4, Numbers;
    "4", "KEY_4", 5, Numbers;
    "5", "KEY_5", 6, Numbers;
    "6", "KEY_6", 7, Numbers;
    "7", "KEY_7", 8, Numbers;
    "8", "KEY_8", 9, Numbers;
    "9", "KEY_9", 10, Numbers;
    "0", "KEY_0", 11, Numbers;

    "F1", "KEY_F1", 59, Function;
    "F2", "KEY_F2", 60, Function;
    "F3", "KEY_F3", 61, Function;
    "F4", "KEY_F4", 62, Function;
    "F5", "KEY_F5", 63, Function;
    "F6", "KEY_F6", 64, Function;
    "F7", "KEY_F7", 65, Function;
    "F8", "KEY_F8", 66, Function;
    "F9", "KEY_F9", 67, Function;
    "F10", "KEY_F10", 68, Function;
    "F11", "KEY_F11", 87, Function;
    "F12", "KEY_F12", 88, Function;
    "F13", "KEY_F13", 183, Function;
    "F14", "KEY_F14", 184, Function;
    "F15", "KEY_F15", 185, Function;
    "F16", "KEY_F16", 186, Function;
    "F17", "KEY_F17", 187, Function;
    "F18", "KEY_F18", 188, Function;
    "F19", "KEY_F19", 189, Function;
    "F20", "KEY_F20", 190, Function;
    "F21", "KEY_F21", 191, Function;
    "F22", "KEY_F22", 192, Function;
    "F23", "KEY_F23", 193, Function;
    "F24", "KEY_F24", 194, Function;

    "UP", "KEY_UP", 103, Navigation;
    "DOWN", "KEY_DOWN", 108, Navigation;
    "LEFT", "KEY_LEFT", 105, Navigation;
    "RIGHT", "KEY_RIGHT", 106, Navigation;
    "HOME", "KEY_HOME", 102, Navigation;
    "END", "KEY_END", 107, Navigation;
    "PAGE_UP", "KEY_PAGEUP", 104, Navigation;
    "PAGE_DOWN", "KEY_PAGEDOWN", 109, Navigation;

    "ESC", "KEY_ESC", 1, Editing;
    "TAB", "KEY_TAB", 15, Editing;
    "ENTER", "KEY_ENTER", 28, Editing;
    "SPACE", "KEY_SPACE", 57, Editing;
    "BACKSPACE", "KEY_BACKSPACE", 14, Editing;
    "INSERT", "KEY_INSERT", 110, Editing;
    "DELETE", "KEY_DELETE", 111, Editing;
    "CAPSLOCK", "KEY_CAPSLOCK", 58, Editing;

    "MINUS", "KEY_MINUS", 12, Symbols;
    "EQUAL", "KEY_EQUAL", 13, Symbols;
    "LEFT_BRACE", "KEY_LEFTBRACE", 26, Symbols;
    "RIGHT_BRACE", "KEY_RIGHTBRACE", 27, Symbols;
    "SEMICOLON", "KEY_SEMICOLON", 39, Symbols;
    "APOSTROPHE", "KEY_APOSTROPHE", 40, Symbols;
    "GRAVE", "KEY_GRAVE", 41, Symbols;
    "BACKSLASH", "KEY_BACKSLASH", 43, Symbols;
    "COMMA", "KEY_COMMA", 51, Symbols;
    "DOT", "KEY_DOT", 52, Symbols;
    "SLASH", "KEY_SLASH", 53, Symbols;

    "MUTE", "KEY_MUTE", 113, Media;
    "VOLUME_DOWN", "KEY_VOLUMEDOWN", 114, Media;
    "VOLUME_UP", "KEY_VOLUMEUP", 115, Media;
    "NEXT_SONG", "KEY_NEXTSONG", 163, Media;
    "PLAY_PAUSE", "KEY_PLAYPAUSE", 164, Media;
    "PREVIOUS_SONG", "KEY_PREVIOUSSONG", 165, Media;
    "STOP_CD", "KEY_STOPCD", 166, Media;

    "SYSRQ", "KEY_SYSRQ", 99, System;
    "PRINT", "KEY_PRINT", 210, System;
    "PAUSE", "KEY_PAUSE", 119, System;
    "SCROLLLOCK", "KEY_SCROLLLOCK", 70, System;
    "COMPOSE", "KEY_COMPOSE", 127, System;
    "MENU", "KEY_MENU", 139, System;
    "POWER", "KEY_POWER", 116, System;
    "SLEEP", "KEY_SLEEP", 142, System;
    "CALC", "KEY_CALC", 140, System;
    "WWW", "KEY_WWW", 150, System;
    "MAIL", "KEY_MAIL", 155, System;
    "BACK", "KEY_BACK", 158, System;
    "FORWARD", "KEY_FORWARD", 159, System;
    "HOMEPAGE", "KEY_HOMEPAGE", 172, System;

    "NUMLOCK", "KEY_NUMLOCK", 69, Numpad;
    "KP0", "KEY_KP0", 82, Numpad;
    "KP1", "KEY_KP1", 79, Numpad;
    "KP2", "KEY_KP2", 80, Numpad;
    "KP3", "KEY_KP3", 81, Numpad;
    "KP4", "KEY_KP4", 75, Numpad;
    "KP5", "KEY_KP5", 76, Numpad;
    "KP6", "KEY_KP6", 77, Numpad;
    "KP7", "KEY_KP7", 71, Numpad;
    "KP8", "KEY_KP8", 72, Numpad;
    "KP9", "KEY_KP9", 73, Numpad;
    "KP_DOT", "KEY_KPDOT", 83, Numpad;
    "KP_PLUS", "KEY_KPPLUS", 78, Numpad;
    "KP_MINUS", "KEY_KPMINUS", 74, Numpad;
    "KP_ASTERISK", "KEY_KPASTERISK", 55, Numpad;
    "KP_SLASH", "KEY_KPSLASH", 98, Numpad;
    "KP_ENTER", "KEY_KPENTER", 96, Numpad;
};

// Extra spellings accepted in profiles
static ALIASES: &[(&str, &str)] = &[
    ("ESCAPE", "ESC"),
    ("RETURN", "ENTER"),
    ("CONTROL", "CTRL"),
    ("LCTRL", "CTRL"),
    ("LEFT_CTRL", "CTRL"),
    ("RCTRL", "CTRL_R"),
    ("RIGHT_CTRL", "CTRL_R"),
    ("LSHIFT", "SHIFT"),
    ("LEFT_SHIFT", "SHIFT"),
    ("RSHIFT", "SHIFT_R"),
    ("RIGHT_SHIFT", "SHIFT_R"),
    ("LALT", "ALT"),
    ("LEFT_ALT", "ALT"),
    ("RALT", "ALT_R"),
    ("RIGHT_ALT", "ALT_R"),
    ("ALTGR", "ALT_R"),
    ("SUPER", "META"),
    ("WIN", "META"),
    ("LEFT_META", "META"),
    ("RIGHT_META", "META_R"),
    ("PGUP", "PAGE_UP"),
    ("PGDN", "PAGE_DOWN"),
    ("INS", "INSERT"),
    ("DEL", "DELETE"),
    ("PERIOD", "DOT"),
];

struct Tables {
    by_name: HashMap<String, u16>,
    by_code: HashMap<u16, &'static KeyEntry>,
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut by_name = HashMap::with_capacity(KEY_TABLE.len() * 2 + ALIASES.len());
        let mut by_code = HashMap::with_capacity(KEY_TABLE.len());
        for entry in KEY_TABLE {
            by_name.insert(entry.schema.to_string(), entry.code);
            by_name.insert(entry.evdev.to_string(), entry.code);
            by_code.entry(entry.code).or_insert(entry);
        }
        for (alias, target) in ALIASES {
            if let Some(code) = by_name.get(*target).copied() {
                by_name.insert((*alias).to_string(), code);
            }
        }
        Tables { by_name, by_code }
    })
}

/// Canonical evdev name for a code, `UNKNOWN` when the code is not in the table
pub fn key_name(code: u16) -> &'static str {
    tables()
        .by_code
        .get(&code)
        .map(|entry| entry.evdev)
        .unwrap_or("UNKNOWN")
}

/// Preferred profile name for a key
pub fn schema_name(key: Key) -> Option<&'static str> {
    tables().by_code.get(&key.code()).map(|entry| entry.schema)
}

/// Resolve a schema name, alias or evdev name (case-insensitive)
pub fn key_from_name(name: &str) -> Option<Key> {
    let upper = name.trim().to_ascii_uppercase();
    tables().by_name.get(&upper).copied().map(Key::from)
}

/// Resolve a key name, producing suggestions for near misses
pub fn validate_key(name: &str) -> Result<Key, KeyError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(KeyError::Empty);
    }
    key_from_name(trimmed).ok_or_else(|| KeyError::Unknown {
        name: trimmed.to_string(),
        suggestions: suggest(trimmed),
    })
}

/// Up to three schema names close to `name`
pub fn suggest(name: &str) -> Vec<String> {
    let upper = name.to_ascii_uppercase();
    let mut scored: Vec<(usize, &'static str)> = KEY_TABLE
        .iter()
        .filter_map(|entry| {
            let distance = edit_distance(&upper, entry.schema);
            let threshold = (entry.schema.len().max(upper.len()) / 3).max(1);
            (distance <= threshold).then_some((distance, entry.schema))
        })
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(3).map(|(_, s)| s.to_string()).collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// All table entries for a category
pub fn keys_in_category(category: KeyCategory) -> Vec<&'static KeyEntry> {
    KEY_TABLE.iter().filter(|e| e.category == category).collect()
}

/// Schema names grouped by category, in table order
pub fn key_categories() -> Vec<(KeyCategory, Vec<&'static str>)> {
    KeyCategory::iter()
        .map(|cat| (cat, keys_in_category(cat).iter().map(|e| e.schema).collect()))
        .collect()
}

/// Key and shift requirement for typing an ASCII character on a US layout
pub fn ascii_key(ch: char) -> Option<(Key, bool)> {
    if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
        return key_from_name(ch.encode_utf8(&mut [0; 4])).map(|k| (k, false));
    }
    if ch.is_ascii_uppercase() {
        return key_from_name(ch.encode_utf8(&mut [0; 4])).map(|k| (k, true));
    }

    let (name, shift) = match ch {
        ' ' => ("SPACE", false),
        '\n' => ("ENTER", false),
        '\t' => ("TAB", false),
        '-' => ("MINUS", false),
        '_' => ("MINUS", true),
        '=' => ("EQUAL", false),
        '+' => ("EQUAL", true),
        '[' => ("LEFT_BRACE", false),
        '{' => ("LEFT_BRACE", true),
        ']' => ("RIGHT_BRACE", false),
        '}' => ("RIGHT_BRACE", true),
        '\\' => ("BACKSLASH", false),
        '|' => ("BACKSLASH", true),
        ';' => ("SEMICOLON", false),
        ':' => ("SEMICOLON", true),
        '\'' => ("APOSTROPHE", false),
        '"' => ("APOSTROPHE", true),
        ',' => ("COMMA", false),
        '<' => ("COMMA", true),
        '.' => ("DOT", false),
        '>' => ("DOT", true),
        '/' => ("SLASH", false),
        '?' => ("SLASH", true),
        '`' => ("GRAVE", false),
        '~' => ("GRAVE", true),
        '!' => ("1", true),
        '@' => ("2", true),
        '#' => ("3", true),
        '$' => ("4", true),
        '%' => ("5", true),
        '^' => ("6", true),
        '&' => ("7", true),
        '*' => ("8", true),
        '(' => ("9", true),
        ')' => ("0", true),
        _ => return None,
    };
    key_from_name(name).map(|k| (k, shift))
}
