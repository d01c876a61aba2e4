//! Scripted MicroPython device for integration tests.
//!
//! Speaks the Normal, raw and raw-paste protocols over an in-memory
//! transport and executes the small set of statements the host generates
//! against an in-memory filesystem.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use mpy_device::{DeviceIdentity, DeviceSession, SessionConfig};
use mpy_transport::{memory_pair, DeviceEnd};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub const BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
pub const FRIENDLY: &[u8] =
    b"\r\nMicroPython v1.22.0 on 2024-01-01; stub\r\nType \"help()\" for more information.\r\n>>> ";

/// Knobs for the stub's behaviour.
#[derive(Debug, Clone)]
pub struct StubOptions {
    /// Raw-paste window; `None` refuses raw-paste.
    pub window: Option<u16>,
    /// Reply to a raw-paste request with a malformed header.
    pub bad_header: bool,
    /// End raw-paste reception after this many payload bytes.
    pub end_paste_after: Option<usize>,
    /// Fixed output for `ls(...)`, bypassing the filesystem.
    pub ls_reply: Option<String>,
    /// Go silent right after sending a raw-paste header.
    pub silent_after_header: bool,
}

impl Default for StubOptions {
    fn default() -> Self {
        StubOptions {
            window: Some(128),
            bad_header: false,
            end_paste_after: None,
            ls_reply: None,
            silent_after_header: false,
        }
    }
}

#[derive(Debug)]
struct Handle {
    path: String,
    pos: usize,
}

/// Everything the stub knows, shared with the test.
#[derive(Debug, Default)]
pub struct StubState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub ls_defined: bool,
    pub mute: bool,
    /// Keep executing input but send nothing back.
    pub silent: bool,
    pub raw_mode: bool,
    pub rx_bytes: usize,
    pub breaks: usize,
    pub eofs: usize,
    pub raw_entries: usize,
    pub raw_exits: usize,
    pub paste_sessions: usize,
    pub paste_chunks: usize,
    pub paste_bytes: usize,
    pub credit_grants: usize,
    pub credit_overflow: bool,
    pub hex_writes: usize,
    pub statements: Vec<String>,
    handle: Option<Handle>,
}

impl StubState {
    pub fn has_open_file(&self) -> bool {
        self.handle.is_some()
    }
}

pub struct Stub {
    pub state: Arc<Mutex<StubState>>,
    task: JoinHandle<()>,
}

impl Stub {
    pub fn spawn(device: DeviceEnd, options: StubOptions) -> Stub {
        let state = Arc::new(Mutex::new(StubState::default()));
        let machine = Machine {
            options,
            state: state.clone(),
            mode: Mode::Normal,
            line: Vec::new(),
            block: None,
            script: Vec::new(),
            out: Vec::new(),
        };
        let task = tokio::spawn(machine.run(device));
        Stub { state, task }
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.state.lock().files.insert(path.to_string(), data.to_vec());
    }

    pub fn add_dir(&self, path: &str) {
        self.state.lock().dirs.insert(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn set_mute(&self, mute: bool) {
        self.state.lock().mute = mute;
    }

    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }
}

impl Drop for Stub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Config with the defaults the tests rely on.
pub fn test_config() -> SessionConfig {
    SessionConfig::default()
}

/// A session attached to a fresh stub.
pub fn start(options: StubOptions) -> (DeviceSession, Stub) {
    start_with(options, test_config(), DeviceIdentity::new("stub0"))
}

pub fn start_with(options: StubOptions, config: SessionConfig, identity: DeviceIdentity) -> (DeviceSession, Stub) {
    let (link, device) = memory_pair(&identity.path, config.baud_rate);
    let stub = Stub::spawn(device, options);
    let session = DeviceSession::attach(identity, config, link);
    (session, stub)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Normal,
    Raw,
    PasteRequest(u8),
    Paste { since_grant: usize, received: usize, granted: usize },
}

struct Machine {
    options: StubOptions,
    state: Arc<Mutex<StubState>>,
    mode: Mode,
    line: Vec<u8>,
    block: Option<Vec<String>>,
    script: Vec<u8>,
    out: Vec<u8>,
}

impl Machine {
    async fn run(mut self, mut device: DeviceEnd) {
        while let Some(chunk) = device.recv().await {
            let silent = {
                let mut state = self.state.lock();
                if state.mute {
                    continue;
                }
                state.rx_bytes += chunk.len();
                if matches!(self.mode, Mode::Paste { .. }) {
                    state.paste_chunks += 1;
                }
                state.silent
            };
            for &byte in chunk.iter() {
                self.feed(byte);
            }
            let out = std::mem::take(&mut self.out);
            if !silent && !out.is_empty() {
                device.send(&out);
            }
        }
    }

    fn feed(&mut self, byte: u8) {
        match self.mode {
            Mode::Normal => self.feed_normal(byte),
            Mode::Raw => self.feed_raw(byte),
            Mode::PasteRequest(stage) => self.feed_paste_request(stage, byte),
            Mode::Paste { .. } => self.feed_paste(byte),
        }
    }

    fn feed_normal(&mut self, byte: u8) {
        match byte {
            0x01 => {
                self.line.clear();
                self.block = None;
                self.script.clear();
                self.mode = Mode::Raw;
                let mut state = self.state.lock();
                state.raw_mode = true;
                state.raw_entries += 1;
                drop(state);
                self.out.extend_from_slice(BANNER);
            }
            0x02 => {
                self.line.clear();
                self.block = None;
                self.out.extend_from_slice(FRIENDLY);
            }
            0x03 => {
                self.line.clear();
                self.block = None;
                self.state.lock().breaks += 1;
                self.out.extend_from_slice(b"\r\n>>> ");
            }
            0x04 => {
                self.state.lock().eofs += 1;
                self.out.extend_from_slice(b"MPY: soft reboot");
                self.out.extend_from_slice(FRIENDLY);
            }
            b'\r' => {
                let text = String::from_utf8_lossy(&std::mem::take(&mut self.line)).to_string();
                self.out.extend_from_slice(text.as_bytes());
                self.out.extend_from_slice(b"\r\n");
                self.handle_line(text);
            }
            b'\n' => {}
            other => self.line.push(other),
        }
    }

    fn handle_line(&mut self, text: String) {
        if let Some(block) = self.block.as_mut() {
            if text.trim().is_empty() {
                let header = block.first().cloned().unwrap_or_default();
                self.block = None;
                if header.starts_with("def ls(") {
                    self.state.lock().ls_defined = true;
                }
                self.out.extend_from_slice(b">>> ");
            } else {
                block.push(text);
                self.out.extend_from_slice(b"... ");
            }
            return;
        }
        if text.starts_with("def ") {
            self.block = Some(vec![text]);
            self.out.extend_from_slice(b"... ");
            return;
        }
        if text.trim().is_empty() {
            self.out.extend_from_slice(b">>> ");
            return;
        }
        match self.exec(&text) {
            Ok(stdout) => self.out.extend_from_slice(stdout.as_bytes()),
            Err(message) => {
                self.out.extend_from_slice(
                    format!(
                        "Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\n{}\r\n",
                        message
                    )
                    .as_bytes(),
                );
            }
        }
        self.out.extend_from_slice(b">>> ");
    }

    fn feed_raw(&mut self, byte: u8) {
        match byte {
            0x01 => {
                self.script.clear();
                self.out.extend_from_slice(BANNER);
            }
            0x02 => {
                self.script.clear();
                self.mode = Mode::Normal;
                let mut state = self.state.lock();
                state.raw_mode = false;
                state.raw_exits += 1;
                drop(state);
                self.out.extend_from_slice(FRIENDLY);
            }
            0x03 => self.script.clear(),
            0x04 => {
                self.out.extend_from_slice(b"OK");
                self.run_script();
            }
            0x05 => self.mode = Mode::PasteRequest(0),
            other => self.script.push(other),
        }
    }

    fn feed_paste_request(&mut self, stage: u8, byte: u8) {
        match (stage, byte) {
            (0, b'A') => self.mode = Mode::PasteRequest(1),
            (1, 0x01) => {
                self.script.clear();
                if self.options.bad_header {
                    self.out.extend_from_slice(b"X\x01");
                    self.mode = Mode::Raw;
                    return;
                }
                match self.options.window {
                    Some(window) => {
                        self.out.push(b'R');
                        self.out.push(0x01);
                        self.out.extend_from_slice(&window.to_le_bytes());
                        let mut state = self.state.lock();
                        state.paste_sessions += 1;
                        if self.options.silent_after_header {
                            state.silent = true;
                        }
                        drop(state);
                        self.mode = Mode::Paste {
                            since_grant: 0,
                            received: 0,
                            granted: window as usize,
                        };
                    }
                    None => {
                        self.out.extend_from_slice(b"R\x00");
                        self.mode = Mode::Raw;
                    }
                }
            }
            _ => self.mode = Mode::Raw,
        }
    }

    fn feed_paste(&mut self, byte: u8) {
        let Mode::Paste {
            mut since_grant,
            mut received,
            mut granted,
        } = self.mode
        else {
            return;
        };
        let window = self.options.window.unwrap_or(1) as usize;

        if byte == 0x04 {
            self.out.push(0x04);
            self.mode = Mode::Raw;
            self.run_script();
            return;
        }

        self.script.push(byte);
        received += 1;
        since_grant += 1;
        {
            let mut state = self.state.lock();
            state.paste_bytes += 1;
            if received > granted {
                state.credit_overflow = true;
            }
        }

        if self.options.end_paste_after == Some(received) {
            // stop receiving; discard what arrived
            self.out.push(0x04);
            self.script.clear();
            self.mode = Mode::Raw;
            return;
        }

        if since_grant == window {
            since_grant = 0;
            granted += window;
            self.state.lock().credit_grants += 1;
            self.out.push(0x01);
        }
        self.mode = Mode::Paste {
            since_grant,
            received,
            granted,
        };
    }

    fn run_script(&mut self) {
        let source = String::from_utf8_lossy(&std::mem::take(&mut self.script)).to_string();
        let mut stdout = String::new();
        let mut stderr = String::new();
        for (n, statement) in source.split('\n').enumerate() {
            let statement = statement.trim_end_matches('\r');
            if statement.trim().is_empty() {
                continue;
            }
            match self.exec(statement) {
                Ok(out) => stdout.push_str(&out),
                Err(message) => {
                    stderr = format!(
                        "Traceback (most recent call last):\r\n  File \"<stdin>\", line {}, in <module>\r\n{}\r\n",
                        n + 1,
                        message
                    );
                    break;
                }
            }
        }
        self.out.extend_from_slice(stdout.as_bytes());
        self.out.push(0x04);
        self.out.extend_from_slice(stderr.as_bytes());
        self.out.push(0x04);
        self.out.push(b'>');
    }

    fn exec(&mut self, statement: &str) -> Result<String, String> {
        let statement = statement.trim();
        let mut state = self.state.lock();
        state.statements.push(statement.to_string());
        let args = literals(statement);

        if statement == "import os" || statement == "import binascii" || statement == "pass" {
            return Ok(String::new());
        }
        if statement.starts_with("f = open(") {
            let (path, mode) = (arg(&args, 0)?, arg(&args, 1)?);
            if mode.starts_with('r') {
                if !state.files.contains_key(&path) {
                    return Err(enoent());
                }
            } else {
                if !state.parent_exists(&path) || state.dirs.contains(&path) {
                    return Err(enoent());
                }
                state.files.insert(path.clone(), Vec::new());
            }
            state.handle = Some(Handle { path, pos: 0 });
            return Ok(String::new());
        }
        if statement == "f.close()" {
            state.handle = None;
            return Ok(String::new());
        }
        if statement.starts_with("f.write(binascii.unhexlify(") {
            let data = unhex(&arg(&args, 0)?)?;
            let path = state.handle.as_ref().map(|h| h.path.clone()).ok_or_else(name_error)?;
            state.hex_writes += 1;
            state.files.entry(path).or_default().extend_from_slice(&data);
            return Ok(String::new());
        }
        if let Some(rest) = statement.strip_prefix("print(binascii.hexlify(f.read(") {
            let n: usize = rest
                .split(')')
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| "SyntaxError: invalid syntax".to_string())?;
            let (path, pos) = state
                .handle
                .as_ref()
                .map(|h| (h.path.clone(), h.pos))
                .ok_or_else(name_error)?;
            let data = state.files.get(&path).cloned().unwrap_or_default();
            let end = (pos + n).min(data.len());
            let chunk = &data[pos.min(end)..end];
            if let Some(handle) = state.handle.as_mut() {
                handle.pos = end;
            }
            let hex: String = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            return Ok(format!("{}\r\n", hex));
        }
        if statement.starts_with("os.mkdir(") {
            let path = arg(&args, 0)?;
            if state.exists(&path) {
                return Err("OSError: [Errno 17] EEXIST".to_string());
            }
            if !state.parent_exists(&path) {
                return Err(enoent());
            }
            state.dirs.insert(path);
            return Ok(String::new());
        }
        if statement.starts_with("os.rmdir(") {
            let path = arg(&args, 0)?;
            if !state.dirs.contains(&path) {
                return Err(enoent());
            }
            if !state.children(&path).is_empty() {
                return Err("OSError: [Errno 13] EACCES".to_string());
            }
            state.dirs.remove(&path);
            return Ok(String::new());
        }
        if statement.starts_with("os.unlink(") {
            let path = arg(&args, 0)?;
            if state.files.remove(&path).is_none() {
                return Err(enoent());
            }
            return Ok(String::new());
        }
        if statement.starts_with("os.rename(") {
            let (old, new) = (arg(&args, 0)?, arg(&args, 1)?);
            if let Some(data) = state.files.remove(&old) {
                state.files.insert(new, data);
            } else if state.dirs.remove(&old) {
                state.dirs.insert(new);
            } else {
                return Err(enoent());
            }
            return Ok(String::new());
        }
        if statement.starts_with("print(os.stat(") {
            let path = arg(&args, 0)?;
            return match state.files.get(&path) {
                Some(data) => Ok(format!("{}\r\n", data.len())),
                None if state.dirs.contains(&path) => Ok("0\r\n".to_string()),
                None => Err(enoent()),
            };
        }
        if statement.starts_with("ls(") {
            if !state.ls_defined {
                return Err("NameError: name 'ls' isn't defined".to_string());
            }
            if let Some(reply) = &self.options.ls_reply {
                return Ok(format!("{}\r\n", reply));
            }
            let dir = arg(&args, 0)?;
            let key = if dir == "/" { "/".to_string() } else { dir.trim_end_matches('/').to_string() };
            if key != "/" && !state.dirs.contains(&key) {
                return Err(enoent());
            }
            let mut out = String::new();
            for child in state.children(&key) {
                let name = child.rsplit('/').next().unwrap_or_default();
                let full_name = format!("{}{}", dir, name);
                match state.files.get(&child) {
                    Some(data) => out.push_str(&format!("{} 32768 {} ,\r\n", full_name, data.len())),
                    None => out.push_str(&format!("{} 16384 0 ,\r\n", full_name)),
                }
            }
            return Ok(out);
        }
        if statement.starts_with("print(") {
            return Ok(format!("{}\r\n", arg(&args, 0)?));
        }
        Err(name_error())
    }
}

impl StubState {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn parent_exists(&self, path: &str) -> bool {
        let parent = parent(path);
        parent == "/" || self.dirs.contains(&parent)
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .filter(|p| parent(p) == dir)
            .cloned()
            .collect();
        children.sort();
        children
    }
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn enoent() -> String {
    "OSError: [Errno 2] ENOENT".to_string()
}

fn name_error() -> String {
    "NameError: name 'f' isn't defined".to_string()
}

fn arg(args: &[String], index: usize) -> Result<String, String> {
    args.get(index)
        .cloned()
        .ok_or_else(|| "SyntaxError: invalid syntax".to_string())
}

fn unhex(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("ValueError: odd-length string".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| "ValueError: non-hex digit found".to_string()))
        .collect()
}

/// Every single-quoted Python literal in `statement`, unescaped the way
/// Python 3 does: `\x`, `\u` and `\U` all name code points.
fn literals(statement: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = statement.chars();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut text = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\'' => break,
                '\\' => match chars.next() {
                    Some('n') => text.push('\n'),
                    Some('r') => text.push('\r'),
                    Some('t') => text.push('\t'),
                    Some('x') => text.push(code_point(&mut chars, 2)),
                    Some('u') => text.push(code_point(&mut chars, 4)),
                    Some('U') => text.push(code_point(&mut chars, 8)),
                    Some(other) => text.push(other),
                    None => break,
                },
                other => text.push(other),
            }
        }
        out.push(text);
    }
    out
}

fn code_point(chars: &mut std::str::Chars<'_>, digits: usize) -> char {
    let hex: String = chars.take(digits).collect();
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}
