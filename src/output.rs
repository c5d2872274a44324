use crate::error::{DeskError, ProcessErrorDetails};
use clap::Parser;
use dialoguer::console::style;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct JsonResult<T: Serialize> {
    pub ok: bool,
    pub result: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ProcessErrorDetails>,
}

pub fn print_json<T: Serialize>(payload: &T) -> Result<(), DeskError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

pub fn print_ok(payload: serde_json::Value) -> Result<(), DeskError> {
    print_json(&JsonResult {
        ok: true,
        result: Some(payload),
        error: None,
        error_details: None,
    })
}

pub fn success(message: &str) {
    println!("{} {}", style("✓").green(), message);
}

/// Prints `err` in the selected format and exits with status 1.
pub fn fail(err: &DeskError, json: bool) -> ! {
    if json {
        let payload = JsonResult::<serde_json::Value> {
            ok: false,
            result: None,
            error: Some(err.to_string()),
            error_details: err.process_details().cloned(),
        };
        if print_json(&payload).is_err() {
            eprintln!("{err}");
        }
    } else {
        eprintln!("{} {err}", style("error:").red().bold());
    }
    std::process::exit(1);
}

/// Parses arguments; help and version exit 0, any other parse error exits 1.
pub fn parse_args<P: Parser>() -> P {
    match P::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}
