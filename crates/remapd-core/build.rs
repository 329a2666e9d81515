use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

// Emits the `Key` newtype into OUT_DIR; key.rs includes it next to the
// translation tables so the lookup functions stay in ordinary source.
fn main() -> io::Result<()> {
    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let dest_path = Path::new(&out_dir).join("key_codes.rs");
    let mut f = File::create(&dest_path)?;

    writeln!(
        f,
        r#"
/// A Linux input-event code (`EV_KEY` space: keyboard keys and buttons).
///
/// Physical keys read from grabbed devices and synthetic keys written to
/// the virtual device share this representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Key(pub u16);

impl Key {{
    /// Raw input-event code
    pub fn code(self) -> u16 {{
        self.0
    }}

    /// Canonical evdev-style name (`KEY_A`, `BTN_LEFT`, ...)
    pub fn name(self) -> &'static str {{
        key_name(self.0)
    }}

    /// Whether this code lies in the button range (mouse, joystick)
    pub fn is_button(self) -> bool {{
        (0x100..0x160).contains(&self.0)
    }}
}}

impl From<u16> for Key {{
    fn from(code: u16) -> Self {{
        Key(code)
    }}
}}

impl From<Key> for u16 {{
    fn from(key: Key) -> Self {{
        key.0
    }}
}}

impl fmt::Display for Key {{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {{
        match schema_name(*self) {{
            Some(name) => f.write_str(name),
            None => write!(f, "0x{{:x}}", self.0),
        }}
    }}
}}

impl FromStr for Key {{
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {{
        validate_key(s)
    }}
}}
"#
    )?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
