use std::fmt::{Display, Formatter};

/// Reference to a published image: `<registry>/<app_name>:<tag>`.
///
/// The tag is always a commit digest, never a floating tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReference {
    pub registry: String,
    pub app_name: String,
    pub tag: String,
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.app_name, self.tag)
    }
}

/// A minimal container build descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dockerfile {
    /// Which image to use as output base image.
    pub base_image: String,

    pub workdir: Option<String>,

    /// `(source, destination)` pairs, relative to the build context.
    pub copy: Vec<(String, String)>,

    /// Auto-expose this port.
    pub expose: Option<u16>,

    pub entrypoint: Vec<String>,

    pub cmd: Vec<String>,
}

impl Display for Dockerfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FROM {}", self.base_image)?;
        if let Some(workdir) = &self.workdir {
            writeln!(f, "WORKDIR {workdir}")?;
        }
        for (source, destination) in &self.copy {
            writeln!(f, "COPY {source} {destination}")?;
        }
        if let Some(port) = self.expose {
            writeln!(f, "EXPOSE {port}")?;
        }
        if !self.entrypoint.is_empty() {
            writeln!(f, "ENTRYPOINT {}", exec_form(&self.entrypoint))?;
        }
        if !self.cmd.is_empty() {
            writeln!(f, "CMD {}", exec_form(&self.cmd))?;
        }
        Ok(())
    }
}

/// `["java", "-jar", "/app/app.jar"]`
fn exec_form(args: &[String]) -> String {
    let quoted = args
        .iter()
        .map(|arg| serde_json::Value::from(arg.as_str()).to_string())
        .collect::<Vec<_>>();
    format!("[{}]", quoted.join(", "))
}
