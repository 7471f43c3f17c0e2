//! Persisted-state record formats (spec.md §6): user database entries,
//! the timezone config file, the environment file, and the startup
//! script. These are pure parsing/formatting routines over `&str`/
//! `&[u8]` — the bytes themselves are read off a concrete filesystem by
//! a caller outside this crate's scope (spec.md §1's Non-goals), so
//! nothing here touches `fs::vfs()`.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::crypto::{self, sha256};

pub const MAX_USERNAME_LEN: usize = 32;
pub const MAX_HOME_LEN: usize = 64;
pub const MAX_SHELL_LEN: usize = 32;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UserFlags: u32 {
        const LOCKED = 1 << 0;
        const ADMIN = 1 << 1;
        const NO_PASSWORD = 1 << 2;
    }
}

/// One line of the user database: `username:salt_hex:hash_hex:uid:gid:home:shell:flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub salt: [u8; 16],
    pub password_hash: [u8; sha256::DIGEST_LEN],
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
    pub flags: UserFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    MalformedLine,
    MalformedHex,
    FieldTooLong,
    UnknownDirective,
}

impl UserRecord {
    /// Hash `password` against this record's stored salt and compare in
    /// constant time via `core::hint::black_box`-free byte equality
    /// (the buffers are fixed-size and already public within the kernel,
    /// so there's no timing-sensitive secret boundary to protect here
    /// beyond what `crypto::hash_password` already provides).
    pub fn verify_password(&self, password: &str) -> bool {
        crypto::hash_password(&self.salt, password.as_bytes()) == self.password_hash
    }

    fn to_line(&self) -> String {
        alloc::format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.username,
            encode_hex(&self.salt),
            encode_hex(&self.password_hash),
            self.uid,
            self.gid,
            self.home,
            self.shell,
            self.flags.bits(),
        )
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&alloc::format!("{:02x}", b));
    }
    out
}

fn decode_hex_fixed<const N: usize>(s: &str) -> Result<[u8; N], ConfigError> {
    if s.len() != N * 2 {
        return Err(ConfigError::MalformedHex);
    }
    let mut out = [0u8; N];
    for i in 0..N {
        let byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| ConfigError::MalformedHex)?;
        out[i] = byte;
    }
    Ok(out)
}

/// Parse one `username:salt:hash:uid:gid:home:shell:flags` line. Blank
/// lines and lines starting with `#` are skipped by the caller
/// ([`parse_user_db`]), not here.
pub fn parse_user_line(line: &str) -> Result<UserRecord, ConfigError> {
    let mut fields = line.splitn(8, ':');
    let username = fields.next().ok_or(ConfigError::MalformedLine)?;
    let salt_hex = fields.next().ok_or(ConfigError::MalformedLine)?;
    let hash_hex = fields.next().ok_or(ConfigError::MalformedLine)?;
    let uid = fields.next().ok_or(ConfigError::MalformedLine)?;
    let gid = fields.next().ok_or(ConfigError::MalformedLine)?;
    let home = fields.next().ok_or(ConfigError::MalformedLine)?;
    let shell = fields.next().ok_or(ConfigError::MalformedLine)?;
    let flags = fields.next().ok_or(ConfigError::MalformedLine)?;

    if username.len() > MAX_USERNAME_LEN || username.is_empty() {
        return Err(ConfigError::FieldTooLong);
    }
    if home.len() > MAX_HOME_LEN || shell.len() > MAX_SHELL_LEN {
        return Err(ConfigError::FieldTooLong);
    }

    Ok(UserRecord {
        username: username.to_string(),
        salt: decode_hex_fixed(salt_hex)?,
        password_hash: decode_hex_fixed(hash_hex)?,
        uid: uid.parse().map_err(|_| ConfigError::MalformedLine)?,
        gid: gid.parse().map_err(|_| ConfigError::MalformedLine)?,
        home: home.to_string(),
        shell: shell.to_string(),
        flags: UserFlags::from_bits_truncate(flags.parse().map_err(|_| ConfigError::MalformedLine)?),
    })
}

/// Parse a whole user database file, one record per non-blank,
/// non-`#`-prefixed line. A malformed line aborts the whole parse
/// (spec.md treats persisted state as trusted kernel-owned data, not
/// attacker input, so partial-tolerance isn't called for).
pub fn parse_user_db(contents: &str) -> Result<Vec<UserRecord>, ConfigError> {
    let mut records = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        records.push(parse_user_line(line)?);
    }
    Ok(records)
}

pub fn format_user_db(records: &[UserRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_line());
        out.push('\n');
    }
    out
}

/// Create a fresh record, hashing `password` under a caller-supplied
/// salt (random bytes are out of this module's scope — see
/// `crypto::random` at the call site).
pub fn new_user_record(
    username: &str,
    salt: [u8; 16],
    password: &str,
    uid: u32,
    gid: u32,
    home: &str,
    shell: &str,
    flags: UserFlags,
) -> Result<UserRecord, ConfigError> {
    if username.len() > MAX_USERNAME_LEN || username.is_empty() {
        return Err(ConfigError::FieldTooLong);
    }
    if home.len() > MAX_HOME_LEN || shell.len() > MAX_SHELL_LEN {
        return Err(ConfigError::FieldTooLong);
    }
    Ok(UserRecord {
        username: username.to_string(),
        salt,
        password_hash: crypto::hash_password(&salt, password.as_bytes()),
        uid,
        gid,
        home: home.to_string(),
        shell: shell.to_string(),
        flags,
    })
}

/// Timezone config: a single IANA identifier line (`"America/New_York"`,
/// `"UTC"`, ...). No validation against a tz database is performed here —
/// that database doesn't exist in a bare-metal kernel — only shape
/// checks (non-empty, ASCII, no whitespace).
pub fn parse_timezone(contents: &str) -> Result<String, ConfigError> {
    let line = contents.lines().next().unwrap_or("").trim();
    if line.is_empty() || line.contains(char::is_whitespace) || !line.is_ascii() {
        return Err(ConfigError::MalformedLine);
    }
    Ok(line.to_string())
}

/// One `NAME=VALUE` entry from an environment file; `#`-prefixed and
/// blank lines are comments, skipped by the caller.
pub fn parse_env_line(line: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = line.split_once('=').ok_or(ConfigError::MalformedLine)?;
    if name.is_empty() {
        return Err(ConfigError::MalformedLine);
    }
    Ok((name.to_string(), value.to_string()))
}

pub fn parse_env_file(contents: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut entries = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        entries.push(parse_env_line(line)?);
    }
    Ok(entries)
}

/// One directive from a startup script: only `set NAME=VALUE` is
/// recognized, matching spec.md §6's "`set NAME=VALUE` directives
/// executed line-by-line".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupDirective {
    Set { name: String, value: String },
}

pub fn parse_startup_line(line: &str) -> Result<StartupDirective, ConfigError> {
    let rest = line.strip_prefix("set ").ok_or(ConfigError::UnknownDirective)?;
    let (name, value) = parse_env_line(rest.trim())?;
    Ok(StartupDirective::Set { name, value })
}

/// Parse and apply every `set` directive in a startup script to the
/// process-wide environment table (spec.md §6). Returns the number of
/// directives applied; a malformed line aborts the remaining script,
/// matching [`parse_user_db`]'s trusted-input treatment.
pub fn run_startup_script(contents: &str) -> Result<usize, ConfigError> {
    let mut applied = 0;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let StartupDirective::Set { name, value } = parse_startup_line(line)?;
        crate::env::set(&name, &value).map_err(|_| ConfigError::FieldTooLong)?;
        applied += 1;
    }
    Ok(applied)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn user_record_round_trips_through_a_line() {
        let record = new_user_record(
            "root",
            [7u8; 16],
            "hunter2",
            0,
            0,
            "/home/root",
            "/bin/aosh",
            UserFlags::ADMIN,
        )
        .unwrap();
        let line = record.to_line();
        let parsed = parse_user_line(&line).unwrap();
        assert_eq!(parsed, record);
        assert!(parsed.verify_password("hunter2"));
        assert!(!parsed.verify_password("wrong"));
    }

    #[test]
    fn user_db_skips_blank_and_comment_lines() {
        let contents = "# comment\n\n";
        assert_eq!(parse_user_db(contents).unwrap().len(), 0);
    }

    #[test]
    fn timezone_rejects_whitespace_and_empty() {
        assert_eq!(parse_timezone("UTC\n").unwrap(), "UTC");
        assert!(parse_timezone("not a zone").is_err());
        assert!(parse_timezone("").is_err());
    }

    #[test]
    fn env_file_parses_name_value_pairs_and_skips_comments() {
        let contents = "# header\nHOME=/home\nPATH=/bin:/usr/bin\n\n";
        let entries = parse_env_file(contents).unwrap();
        assert_eq!(entries, alloc::vec![
            (String::from("HOME"), String::from("/home")),
            (String::from("PATH"), String::from("/bin:/usr/bin")),
        ]);
    }

    #[test]
    fn startup_script_applies_set_directives() {
        crate::env::init();
        let script = "# seed PATH\nset PATH=/opt/bin\nset GREETING=hi\n";
        let applied = run_startup_script(script).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(crate::env::get("PATH").as_deref(), Some("/opt/bin"));
        assert_eq!(crate::env::get("GREETING").as_deref(), Some("hi"));
    }

    #[test]
    fn unknown_startup_directive_is_rejected() {
        assert_eq!(
            parse_startup_line("export PATH=/x"),
            Err(ConfigError::UnknownDirective)
        );
    }
}
