/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Free text: a submission or question in the first step, an edit afterwards.
    Text(String),
    Rephrase,
    Next,
    Back,
    Customer(String),
    Extract,
    Save,
    Reset,
    Status,
    Alerts,
    Table { table: String, months_back: Option<u32> },
    Recommend,
    Select(Vec<u32>),
    Combine,
    Config,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                     submit (first step) or replace the submission text
  /rephrase                  ask for a rewrite of the submission
  /next, /back               move between steps
  /customer <name>           set the customer
  /extract                   ask the model for the customer name
  /save                      save the submission
  /reset                     start over
  /status                    show the conversation state
  /alerts                    show and dismiss alerts
  /table <type> [months]     load associate or manager-<category> rows
  /recommend                 rank the loaded rows
  /select <rows>             select rows, e.g. /select 1,3
  /combine                   combine the selected rows
  /config                    show configuration
  /quit                      exit";

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Text(line.to_owned()));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        Ok(match name {
            "rephrase" => Self::Rephrase,
            "next" => Self::Next,
            "back" => Self::Back,
            "customer" => Self::Customer(arg.to_owned()),
            "extract" => Self::Extract,
            "save" => Self::Save,
            "reset" => Self::Reset,
            "status" => Self::Status,
            "alerts" => Self::Alerts,
            "table" => {
                let mut parts = arg.split_whitespace();
                let table = parts.next().ok_or("usage: /table <type> [months-back]")?.to_owned();
                let months_back = match parts.next() {
                    Some(m) => Some(m.parse().map_err(|_| format!("not a month count: {m}"))?),
                    None => None,
                };
                Self::Table { table, months_back }
            }
            "recommend" => Self::Recommend,
            "select" => Self::Select(parse_rows(arg)?),
            "combine" => Self::Combine,
            "config" => Self::Config,
            "help" | "?" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command /{other}, try /help")),
        })
    }
}

/// Row numbers separated by commas or spaces.
fn parse_rows(arg: &str) -> Result<Vec<u32>, String> {
    arg.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| format!("not a row number: {s}")))
        .collect()
}
