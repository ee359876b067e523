use fgsim_core::{FrequencyId, LogLevel};
use serde_json::Value;

/// A parsed `:` command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start {
        task: Option<String>,
        kwargs: Option<Value>,
    },
    Status,
    Load(String),
    Fetch,
    Save {
        path: String,
        clobber: bool,
    },
    Reset,
    Convert(String, FrequencyId),
    Open(String, FrequencyId),
    Download {
        comp_id: String,
        freq_id: FrequencyId,
        hpx: bool,
    },
    Check(String),
    Viewer(String),
    Config(bool),
    Toggle(LogLevel),
    Clear,
    Quit,
}

pub const USAGE: &[(&str, &str)] = &[
    ("start [task] [json]", "start the simulation job"),
    ("status", "pull the task status"),
    ("load <path>", "load a product manifest on the hub"),
    ("fetch", "refresh the product table"),
    ("save[!] <path>", "save the manifest (! overwrites)"),
    ("reset", "forget the loaded manifest"),
    ("convert <comp> <freq-id>", "generate the HPX image"),
    ("open <comp> <freq-id>", "open a product in the viewer"),
    ("download <comp> <freq-id> [healpix]", "open the download URL"),
    ("check <cmd>", "validate an executable on the hub"),
    ("viewer <cmd>", "set and validate the viewer"),
    ("config on|off", "mark the configuration valid or invalid"),
    ("toggle <level>", "show or hide a log level"),
    ("clear", "clear the log (asks first)"),
    ("quit", "leave the console"),
];

fn parse_freq_id(raw: Option<&str>) -> Result<FrequencyId, String> {
    let raw = raw.ok_or("missing frequency id")?;
    raw.parse()
        .map_err(|_| format!("invalid frequency id: {raw}"))
}

fn required(raw: Option<&str>, what: &str) -> Result<String, String> {
    raw.map(str::to_string)
        .ok_or_else(|| format!("missing {what}"))
}

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim().trim_start_matches(':').trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();
    match head {
        "start" | "run" => {
            let (task, kwargs) = match rest.split_once(char::is_whitespace) {
                Some((task, json)) => (Some(task), Some(json.trim())),
                None if rest.is_empty() => (None, None),
                None => (Some(rest), None),
            };
            let kwargs = match kwargs {
                Some(raw) => Some(
                    serde_json::from_str(raw)
                        .map_err(|err| format!("invalid task arguments: {err}"))?,
                ),
                None => None,
            };
            Ok(Command::Start {
                task: task.map(str::to_string),
                kwargs,
            })
        }
        "status" => Ok(Command::Status),
        "load" => Ok(Command::Load(required(args.next(), "manifest path")?)),
        "fetch" | "refresh" => Ok(Command::Fetch),
        "save" | "save!" => Ok(Command::Save {
            path: required(args.next(), "output path")?,
            clobber: head.ends_with('!'),
        }),
        "reset" => Ok(Command::Reset),
        "convert" => {
            let comp = required(args.next(), "component")?;
            Ok(Command::Convert(comp, parse_freq_id(args.next())?))
        }
        "open" => {
            let comp = required(args.next(), "component")?;
            Ok(Command::Open(comp, parse_freq_id(args.next())?))
        }
        "download" => {
            let comp_id = required(args.next(), "component")?;
            let freq_id = parse_freq_id(args.next())?;
            let hpx = !matches!(args.next(), Some("healpix"));
            Ok(Command::Download {
                comp_id,
                freq_id,
                hpx,
            })
        }
        "check" | "which" => Ok(Command::Check(required(args.next(), "command")?)),
        "viewer" => Ok(Command::Viewer(rest.to_string())),
        "config" => match args.next() {
            Some("on" | "valid" | "true") => Ok(Command::Config(true)),
            Some("off" | "invalid" | "false") => Ok(Command::Config(false)),
            _ => Err("usage: config on|off".to_string()),
        },
        "toggle" => {
            let level = required(args.next(), "log level")?;
            level
                .parse()
                .map(Command::Toggle)
                .map_err(|_| format!("unknown log level: {level}"))
        }
        "clear" => Ok(Command::Clear),
        "q" | "quit" => Ok(Command::Quit),
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command: {other}")),
    }
}
