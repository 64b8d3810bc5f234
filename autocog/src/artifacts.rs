use crate::chat::{ChatError, TextGen};
use crate::markers;
use crate::project::{DESCRIPTOR_FILE, PREDICTOR_FILE};
use crate::prompts;
use crate::{RepoFiles, classify::FaultKind};

/// Attempts at initial generation before giving up.
const INITIAL_ATTEMPTS: usize = 3;
/// Attempts per repair / command-derivation request.
const REPAIR_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("generation never produced {what} after {attempts} attempts")]
    Exhausted { what: String, attempts: usize },
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// The two packaging artifacts. Always produced together: a response missing
/// either one is treated as malformed, never returned partially.
#[derive(Clone, Debug)]
pub struct ArtifactPair {
    pub descriptor: String,
    pub predictor: String,
}

/// Generate both artifacts from the repository snapshot. Each attempt issues
/// one request with the same inputs; a response missing either marker pair is
/// retried up to the bound.
pub async fn generate_initial(
    r#gen: &mut dyn TextGen,
    repo: &RepoFiles,
    tell: Option<&str>,
) -> Result<ArtifactPair, GenerateError> {
    let prompt = prompts::generate_artifacts(&repo.files, repo.truncated, tell);
    for attempt in 1..=INITIAL_ATTEMPTS {
        let response = r#gen.ask(&prompt).await?;
        let descriptor = markers::extract_file(&response, DESCRIPTOR_FILE);
        let predictor = markers::extract_file(&response, PREDICTOR_FILE);
        match (descriptor, predictor) {
            (Ok(descriptor), Ok(predictor)) => {
                return Ok(ArtifactPair {
                    descriptor,
                    predictor,
                });
            }
            _ => {
                tracing::warn!(
                    "malformed generation response, retrying (attempt {attempt}/{INITIAL_ATTEMPTS})"
                );
            }
        }
    }
    Err(GenerateError::Exhausted {
        what: format!("{DESCRIPTOR_FILE} and {PREDICTOR_FILE}"),
        attempts: INITIAL_ATTEMPTS,
    })
}

/// Regenerate the artifact matching the diagnosed fault, using the live
/// session for context. Returns the artifact's new full text; writing it and
/// re-running the command are the caller's responsibility.
pub async fn repair(
    r#gen: &mut dyn TextGen,
    fault: FaultKind,
    package_versions: Option<&str>,
) -> Result<String, GenerateError> {
    let (prompt, filename) = match fault {
        FaultKind::Predictor => (prompts::fix_predictor(package_versions), PREDICTOR_FILE),
        FaultKind::Descriptor => (prompts::fix_descriptor(package_versions), DESCRIPTOR_FILE),
        // Command faults are handled by derive_command, not a file rewrite.
        FaultKind::Command => {
            return Err(GenerateError::Exhausted {
                what: "a repairable artifact".into(),
                attempts: 0,
            });
        }
    };

    for attempt in 1..=REPAIR_ATTEMPTS {
        let response = r#gen.ask(&prompt).await?;
        match markers::extract_file(&response, filename) {
            Ok(text) => return Ok(text),
            Err(e) => {
                tracing::warn!(
                    "repair response unusable ({e}), retrying (attempt {attempt}/{REPAIR_ATTEMPTS})"
                );
            }
        }
    }
    Err(GenerateError::Exhausted {
        what: filename.to_string(),
        attempts: REPAIR_ATTEMPTS,
    })
}

/// Derive the prediction command from the current predictor source.
pub async fn derive_command(
    r#gen: &mut dyn TextGen,
    predictor: &str,
) -> Result<String, GenerateError> {
    let prompt = prompts::predict_command(predictor);
    for attempt in 1..=REPAIR_ATTEMPTS {
        let response = r#gen.ask(&prompt).await?;
        match markers::extract_command(&response) {
            Ok(command) if !command.is_empty() => return Ok(command),
            _ => {
                tracing::warn!(
                    "command response unusable, retrying (attempt {attempt}/{REPAIR_ATTEMPTS})"
                );
            }
        }
    }
    Err(GenerateError::Exhausted {
        what: "a predict command".into(),
        attempts: REPAIR_ATTEMPTS,
    })
}
