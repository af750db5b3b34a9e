use anyhow::{Context as _, Result};
use clap::{ColorChoice, Parser};
use optimist::ModuleOptions;
use std::{io::IsTerminal as _, path::PathBuf};

#[derive(Parser, Debug, Clone)]
pub struct Options {
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// JSON file with module options, e.g. `{"confirmOrder": "declaration"}`
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Options {
    /// Whether log output on stderr should be colored.
    pub fn use_color(&self) -> bool {
        match self.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => std::io::stderr().is_terminal(),
        }
    }

    /// Module options from `--config`, or the defaults. `name` applies
    /// unless the file sets one.
    pub fn module_options(&self, name: &str) -> Result<ModuleOptions> {
        let Some(path) = &self.config else {
            return Ok(ModuleOptions {
                name: name.to_owned(),
                ..Default::default()
            });
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut raw: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        if let Some(fields) = raw.as_object_mut() {
            fields
                .entry("name")
                .or_insert_with(|| serde_json::Value::String(name.to_owned()));
        }
        serde_json::from_value(raw).with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimist::ConfirmOrder;

    #[test]
    fn defaults() {
        let options = Options::try_parse_from(["optimist"]).unwrap();
        assert!(!options.verbose);
        assert_eq!(options.color, ColorChoice::Auto);
        let module = options.module_options("todo").unwrap();
        assert_eq!(module.name, "todo");
        assert_eq!(module.confirm_order, ConfirmOrder::Settlement);
    }

    #[test]
    fn color_choice() {
        let options = Options::try_parse_from(["optimist", "--color", "never"]).unwrap();
        assert!(!options.use_color());
        let options = Options::try_parse_from(["optimist", "--color", "always"]).unwrap();
        assert!(options.use_color());
    }

    #[test]
    fn config_file() {
        let path = std::env::temp_dir().join(format!("optimist-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"confirmOrder": "declaration", "maxEffects": 4}"#).unwrap();
        let options = Options::try_parse_from([
            std::ffi::OsStr::new("optimist"),
            std::ffi::OsStr::new("--config"),
            path.as_os_str(),
        ])
        .unwrap();
        let module = options.module_options("todo");
        std::fs::remove_file(&path).unwrap();
        let module = module.unwrap();
        assert_eq!(module.name, "todo");
        assert_eq!(module.confirm_order, ConfirmOrder::Declaration);
        assert_eq!(module.max_effects, 4);
        assert_eq!(module.max_depth, 128);
    }

    #[test]
    fn missing_config_file() {
        let options =
            Options::try_parse_from(["optimist", "--config", "/nonexistent/optimist.json"]).unwrap();
        let err = options.module_options("todo").unwrap_err();
        assert!(format!("{:#}", err).contains("reading config file"));
    }
}
