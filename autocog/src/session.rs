use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt transcript: {0}")]
    Corrupt(String),
}

/// Conversation role. The persisted transcript upper-cases these; parsing is
/// case-insensitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One conversation turn.
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered conversation state: fixed system instructions plus user/assistant
/// turns in strict chronological order.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub system: String,
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Render to the persisted transcript format: `## ROLE:` sections, the
    /// system section always first.
    pub fn render(&self) -> String {
        let mut out = format!("## SYSTEM:\n\n{}\n\n", self.system);
        for turn in &self.turns {
            out.push_str(&format!(
                "## {}:\n\n{}\n\n",
                turn.role.as_str().to_ascii_uppercase(),
                turn.content
            ));
        }
        out
    }

    /// Parse a persisted transcript. A line is a section header only when it
    /// looks like `## <role>:` with a recognized role, so generated content
    /// containing markdown headings survives the round trip.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let mut system: Option<String> = None;
        let mut turns = Vec::new();
        let mut current: Option<(Role, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some(role) = header_role(line) {
                if let Some((prev_role, body)) = current.take() {
                    flush(&mut system, &mut turns, prev_role, &body);
                }
                if role == Role::System && system.is_some() {
                    return Err(SessionError::Corrupt(
                        "more than one SYSTEM section".into(),
                    ));
                }
                if system.is_none() && role != Role::System {
                    return Err(SessionError::Corrupt(format!(
                        "first section must be SYSTEM, found {}",
                        role.as_str()
                    )));
                }
                current = Some((role, Vec::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            } else if !line.trim().is_empty() {
                return Err(SessionError::Corrupt(
                    "content before the first section header".into(),
                ));
            }
        }
        if let Some((role, body)) = current.take() {
            flush(&mut system, &mut turns, role, &body);
        }

        match system {
            Some(system) => Ok(Self { system, turns }),
            None => Err(SessionError::Corrupt("no SYSTEM section".into())),
        }
    }
}

fn header_role(line: &str) -> Option<Role> {
    let rest = line.strip_prefix("## ")?;
    let name = rest.strip_suffix(':')?;
    Role::parse(name.trim())
}

fn flush(system: &mut Option<String>, turns: &mut Vec<Turn>, role: Role, body: &[&str]) {
    let content = body.join("\n").trim().to_string();
    match role {
        Role::System => *system = Some(content),
        role => turns.push(Turn { role, content }),
    }
}

/// Persistence for one repository's conversation, stored as a readable
/// transcript at `<repo>/.autocog/history.md`.
#[derive(Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            path: repo_root.as_ref().join(".autocog").join("history.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Session, SessionError> {
        let text = std::fs::read_to_string(&self.path)?;
        Session::parse(&text)
    }

    /// Overwrite the persisted transcript. The write goes to a temporary file
    /// in the same directory and is renamed into place, so a concurrent reader
    /// of this scope never observes a partial transcript.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| SessionError::Corrupt("transcript path has no parent".into()))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(session.render().as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Delete the persisted transcript. No-op if absent.
    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
