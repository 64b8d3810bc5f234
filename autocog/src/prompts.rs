//! Prompt text for every generation request the loop makes. Kept together so
//! the control flow elsewhere stays free of wording.

use crate::markers::{COMMAND_END, COMMAND_START, file_end, file_start};

pub const SYSTEM_PROMPT: &str = "You are an expert Python machine learning developer.";

/// Closed label set the error diagnosis must answer with.
pub const LABEL_PREDICTOR: &str = "predict.py";
pub const LABEL_DESCRIPTOR: &str = "cog.yaml";
pub const LABEL_COMMAND: &str = "cog_predict";

pub const COG_YAML_EXAMPLE: &str = r#"build:
  gpu: true
  system_packages:
    - "libgl1-mesa-glx"
    - "libglib2.0-0"
  python_version: "3.10"
  python_packages:
    - "torch==2.1.0"
predict: "predict.py:Predictor"
"#;

pub const PREDICT_PY_EXAMPLE: &str = r#"from cog import BasePredictor, Input, Path
import torch

class Predictor(BasePredictor):
    def setup(self):
        """Load the model into memory to make running multiple predictions efficient"""
        self.model = torch.load("./weights.pth")

    # The arguments and types the model takes as input
    def predict(self,
          image: Path = Input(description="Grayscale input image")
    ) -> Path:
        """Run a single prediction on the model"""
        processed_image = preprocess(image)
        output = self.model(processed_image)
        return postprocess(output)
"#;

/// Initial generation: examples, then the repository contents, then the ask.
pub fn generate_artifacts(
    files: &[(String, String)],
    truncated: bool,
    tell: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Below is an example of a cog.yaml file and a predict.py file.\n\n\
         {}\n{}{}\n\n\
         {}\n{}{}\n\n\
         Here are the files of a machine learning repository:\n\n",
        file_start("example_cog.yaml"),
        COG_YAML_EXAMPLE,
        file_end("example_cog.yaml"),
        file_start("example_predict.py"),
        PREDICT_PY_EXAMPLE,
        file_end("example_predict.py"),
    );
    for (name, contents) in files {
        prompt.push_str(&format!(
            "{}\n{}\n{}\n\n",
            file_start(name),
            contents,
            file_end(name)
        ));
    }
    if truncated {
        prompt.push_str("(The repository listing above was truncated to fit.)\n\n");
    }
    prompt.push_str(
        "Generate a predict.py and a cog.yaml that package this repository for \
         inference with Cog. Ensure that all Python packages have pinned versions. \
         Wrap the contents of both files in the strings ",
    );
    prompt.push_str(&format!(
        "'{}' and '{}'. Don't output any other text before or after the files.\n",
        file_start("<filename>"),
        file_end("<filename>")
    ));
    if let Some(tell) = tell {
        prompt.push_str(&format!("\nAdditional instructions from the user:\n{tell}\n"));
    }
    prompt
}

/// Derive the `cog predict` invocation from the current predictor source.
pub fn predict_command(predictor: &str) -> String {
    format!(
        "Below is an example of a cog predict command:\n\n\
         cog predict -i image=@input.jpg\n\n\
         Return a cog predict command for the following predict.py file. Wrap the \
         command in the strings '{COMMAND_START}' and '{COMMAND_END}' and output \
         nothing else.\n\n\
         {}\n{predictor}\n{}\n",
        file_start("predict.py"),
        file_end("predict.py"),
    )
}

/// First classification question: which artifact is at fault.
pub fn diagnose(command: &str, excerpt: &str) -> String {
    format!(
        "The command `{command}` returned the following error:\n\n\
         ```\n{excerpt}\n```\n\n\
         Diagnose whether the error occurred because of an error in predict.py, an \
         error in cog.yaml, or an error in the cog predict command itself. Only \
         output the string {LABEL_COMMAND} or {LABEL_DESCRIPTOR} or \
         {LABEL_PREDICTOR}. Don't output anything else.\n"
    )
}

/// Second, independent classification question: is this additionally a
/// package/dependency resolution problem.
pub fn dependency_check(command: &str, excerpt: &str) -> String {
    format!(
        "Consider again the error from `{command}`:\n\n\
         ```\n{excerpt}\n```\n\n\
         Is this error caused by a missing, incompatible, or unresolvable Python \
         package or system package? Only output the string True or False. Don't \
         output anything else.\n"
    )
}

/// Repair the predictor source. The failing excerpt is already in the session
/// from the diagnosis exchange, so this stays short.
pub fn fix_predictor(package_versions: Option<&str>) -> String {
    let mut prompt = format!(
        "Below is an example of a predict.py file:\n\n\
         {}\n{}{}\n\n\
         Fix the predict.py file so that the error above goes away. ",
        file_start("example_predict.py"),
        PREDICT_PY_EXAMPLE,
        file_end("example_predict.py"),
    );
    if let Some(versions) = package_versions {
        prompt.push_str(&format!(
            "For reference, these package versions exist:\n\n{versions}\n\n"
        ));
    }
    prompt.push_str(&format!(
        "Return the complete new predict.py wrapped in the strings '{}' and '{}'. \
         Don't output any other text.\n",
        file_start("predict.py"),
        file_end("predict.py")
    ));
    prompt
}

/// Repair the build descriptor, optionally with freshly looked-up versions.
pub fn fix_descriptor(package_versions: Option<&str>) -> String {
    let mut prompt = format!(
        "Below is an example of a cog.yaml file:\n\n\
         {}\n{}{}\n\n\
         Fix the cog.yaml file so that the error above goes away. Ensure that all \
         Python packages have pinned versions. Some common sources of errors \
         include:\n\
         * Wrong Python version (sometimes indicated by numpy failing to build)\n\n",
        file_start("example_cog.yaml"),
        COG_YAML_EXAMPLE,
        file_end("example_cog.yaml"),
    );
    if let Some(versions) = package_versions {
        prompt.push_str(&format!(
            "These package versions actually exist — pin to one of them:\n\n{versions}\n\n"
        ));
    }
    prompt.push_str(&format!(
        "Return the complete new cog.yaml wrapped in the strings '{}' and '{}'. \
         Don't output any other text.\n",
        file_start("cog.yaml"),
        file_end("cog.yaml")
    ));
    prompt
}
