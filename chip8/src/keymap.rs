//! Host keyboard to Chip8 keypad mapping.
use std::{fs, path::Path};

use serde::Deserialize;
use smol_str::SmolStr;

use crate::{
    devices::KeyCode,
    error::{Chip8Error, Chip8Result},
};

/// Key mapper
///
/// Maps names of host keyboard keys to the 16 keys of the old COSMAC VIP
/// hex keypad. Several host keys may map to the same keypad key, but a host
/// key maps to at most one keypad key.
///
/// Key names are matched case insensitively.
#[derive(Debug, Clone)]
pub struct KeyMap {
    keys: Box<[(SmolStr, KeyCode)]>,
}

/// Entry of a key map document.
///
/// ```yaml
/// - chip8: 0x1
///   keyboard_keys: [ "1", "KP_1" ]
/// ```
#[derive(Debug, Deserialize)]
struct KeyDef {
    chip8: KeyCode,
    keyboard_keys: Option<Vec<SmolStr>>,
}

impl Default for KeyMap {
    /// The conventional layout, with the left hand block of the keyboard
    /// standing in for the keypad, plus numeric keypad aliases.
    ///
    /// ```text
    /// 1 2 3 4      1 2 3 C
    /// q w e r      4 5 6 D
    /// a s d f  =>  7 8 9 E
    /// z x c v      A 0 B F
    /// ```
    #[rustfmt::skip]
    fn default() -> Self {
        use KeyCode::*;

        const LAYOUT: &[(&str, KeyCode)] = &[
            ("1", Key1), ("2", Key2), ("3", Key3), ("4", KeyC),
            ("q", Key4), ("w", Key5), ("e", Key6), ("r", KeyD),
            ("a", Key7), ("s", Key8), ("d", Key9), ("f", KeyE),
            ("z", KeyA), ("x", Key0), ("c", KeyB), ("v", KeyF),
            ("KP_1", Key1), ("KP_2", Key2), ("KP_3", Key3), ("KP_4", KeyC),
            ("KP_5", Key4), ("KP_6", Key5), ("KP_7", Key6), ("KP_8", KeyD),
            ("KP_9", Key7), ("KP_0", Key8), ("KP_Period", Key9), ("KP_Enter", KeyE),
        ];

        Self {
            keys: LAYOUT
                .iter()
                .map(|(name, keycode)| (SmolStr::new(name), *keycode))
                .collect(),
        }
    }
}

impl KeyMap {
    pub fn from_file(filepath: impl AsRef<Path>) -> Chip8Result<Self> {
        let text = fs::read_to_string(filepath)?;
        Self::from_yaml(&text)
    }

    /// Parse a key map document, which is a list of keypad keys and the
    /// host keyboard keys bound to them.
    pub fn from_yaml(text: &str) -> Chip8Result<Self> {
        let defs: Vec<KeyDef> =
            serde_yaml::from_str(text).map_err(|err| Chip8Error::KeyMap(err.to_string()))?;
        log::debug!("loaded key definitions: {:#?}", defs);

        let mut keys: Vec<(SmolStr, KeyCode)> = Vec::new();

        // lift host key names out of the definitions, paired with their keypad key
        let bindings = defs.iter().flat_map(|def| {
            def.keyboard_keys
                .iter()
                .flatten()
                .map(move |name| (name.trim(), def.chip8))
        });

        for (name, keycode) in bindings {
            if name.is_empty() {
                return Err(Chip8Error::KeyMap(format!("empty key name bound to {keycode}")));
            }

            match keys.iter().find(|(other, _)| other.eq_ignore_ascii_case(name)) {
                Some((_, existing)) if *existing != keycode => {
                    return Err(Chip8Error::KeyMap(format!(
                        "key \"{name}\" is bound to both {existing} and {keycode}"
                    )));
                }
                Some(_) => {}
                None => keys.push((SmolStr::new(name), keycode)),
            }
        }

        Ok(KeyMap {
            keys: keys.into_boxed_slice(),
        })
    }

    /// Given the name of a host key, map it to a Chip8 key.
    pub fn map_key(&self, name: &str) -> Option<KeyCode> {
        let query = name.trim();
        let mapped = self
            .keys
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(query))
            .map(|(_, keycode)| *keycode);

        if mapped.is_none() {
            log::trace!("no key mapping for {query:?}");
        }

        mapped
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, KeyCode)> + '_ {
        self.keys.iter().map(|(name, keycode)| (name.as_str(), *keycode))
    }
}
