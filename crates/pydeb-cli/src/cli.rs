use camino::Utf8PathBuf;
use clap::{ArgAction, Parser};

use pydeb_core::ConvertOptions;

pub const HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nOptions:\n{options}\n";

pub const BEFORE_HELP: &str = concat!(
    "pydeb ",
    env!("CARGO_PKG_VERSION"),
    " – convert Python packages to Debian packages\n\n",
    "Everything after `--` is handed to pip to select what gets converted:\n",
    "  pydeb -- requests\n",
    "  pydeb -r /srv/packages -- 'coloredlogs >= 15' --no-binary :all:\n",
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    disable_help_subcommand = true,
    before_help = BEFORE_HELP,
    help_template = HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct PydebCli {
    #[arg(short, long, help = "Suppress human output (errors still print to stderr)")]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    pub verbose: u8,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes")]
    pub json: bool,
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,
    #[arg(
        short,
        long,
        env = "PYDEB_CONFIG",
        value_name = "PATH",
        help = "Configuration file to load"
    )]
    pub config: Option<Utf8PathBuf>,
    #[arg(
        short,
        long,
        value_name = "DIR",
        help = "Directory produced archives are written to"
    )]
    pub repository: Option<Utf8PathBuf>,
    #[arg(long, value_name = "PREFIX", help = "Name prefix for converted packages")]
    pub name_prefix: Option<String>,
    #[arg(
        long = "no-name-prefix",
        value_name = "PACKAGE",
        help = "Convert PACKAGE without the name prefix (repeatable)"
    )]
    pub no_name_prefix: Vec<String>,
    #[arg(
        long,
        value_name = "FROM,TO",
        value_parser = parse_pair,
        help = "Use the Debian package name TO for the Python package FROM (repeatable)"
    )]
    pub rename: Vec<(String, String)>,
    #[arg(
        long,
        value_name = "PACKAGE,DEB_PACKAGE",
        value_parser = parse_pair,
        help = "Satisfy PACKAGE with the existing Debian package DEB_PACKAGE (repeatable)"
    )]
    pub use_system_package: Vec<(String, String)>,
    #[arg(
        long,
        value_name = "DIR",
        help = "Installation prefix inside produced packages (default /usr)"
    )]
    pub install_prefix: Option<Utf8PathBuf>,
    #[arg(long, value_name = "PATH", help = "Python interpreter to convert for")]
    pub python: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Write the pinned dependency line for the converted set to PATH"
    )]
    pub report_dependencies: Option<Utf8PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Merge the pinned dependency line into the Depends field of the control file at PATH"
    )]
    pub inject_dependencies: Option<Utf8PathBuf>,
    #[arg(long, help = "Convert the remaining packages when one fails")]
    pub keep_going: bool,
    #[arg(short = 'y', long = "yes", help = "Assume yes instead of failing on conflicts")]
    pub auto_confirm: bool,
    #[arg(
        long,
        value_name = "COMMAND",
        help = "Shell command to run after each archive is built"
    )]
    pub post_build: Option<String>,
    #[arg(
        last = true,
        required = true,
        value_name = "PIP_ARGS",
        help = "Arguments handed to pip to select the packages"
    )]
    pub pip_args: Vec<String>,
}

impl PydebCli {
    pub fn to_options(&self) -> ConvertOptions {
        ConvertOptions {
            config: self.config.clone(),
            repository: self.repository.clone(),
            name_prefix: self.name_prefix.clone(),
            no_name_prefix: self.no_name_prefix.clone(),
            rename: self.rename.clone(),
            use_system_package: self.use_system_package.clone(),
            install_prefix: self.install_prefix.clone(),
            python: self.python.clone(),
            report_dependencies: self.report_dependencies.clone(),
            inject_dependencies: self.inject_dependencies.clone(),
            keep_going: self.keep_going,
            auto_confirm: self.auto_confirm,
            post_build: self.post_build.clone(),
        }
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let Some((from, to)) = raw.split_once(',') else {
        return Err(format!("expected FROM,TO but got {raw:?}"));
    };
    let from = from.trim();
    let to = to.trim();
    if from.is_empty() || to.is_empty() {
        return Err(format!("expected FROM,TO but got {raw:?}"));
    }
    Ok((from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_invocation() {
        let cli = PydebCli::parse_from([
            "pydeb",
            "-r",
            "/srv/packages",
            "--rename",
            "six,python3-six-custom",
            "--no-name-prefix",
            "some-tool",
            "--keep-going",
            "--",
            "requests",
            "--no-binary",
            ":all:",
        ]);
        assert_eq!(cli.repository.as_deref(), Some("/srv/packages".into()));
        assert_eq!(cli.pip_args, vec!["requests", "--no-binary", ":all:"]);
        let options = cli.to_options();
        assert_eq!(
            options.rename,
            vec![("six".to_string(), "python3-six-custom".to_string())]
        );
        assert!(options.keep_going);
    }

    #[test]
    fn rename_pairs_need_two_parts() {
        assert!(parse_pair("justone").is_err());
        assert!(parse_pair("a,").is_err());
        assert_eq!(
            parse_pair(" a , b "),
            Ok(("a".to_string(), "b".to_string()))
        );
    }

    #[test]
    fn system_packages_stay_separate_from_renames() {
        let cli = PydebCli::parse_from([
            "pydeb",
            "--use-system-package",
            "lxml,python3-lxml",
            "--",
            "requests",
        ]);
        let options = cli.to_options();
        assert!(options.rename.is_empty());
        assert_eq!(
            options.use_system_package,
            vec![("lxml".to_string(), "python3-lxml".to_string())]
        );
    }
}
