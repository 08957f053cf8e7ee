use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use rollcall_core::AttendanceRecord;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld daemon
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the face gallery from a roster workbook (Images, Names, Roll no)
    Train {
        /// Roster .xlsx file
        roster: PathBuf,
    },
    /// Mark attendance from a classroom snapshot
    Recognize {
        /// JPEG or PNG image
        image: PathBuf,
    },
    /// Show the latest attendance record
    Attendance {
        /// Save the raw workbook here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Train { roster } => {
            let body = post_file(&client, &format!("{base}/train"), &roster).await?;
            println!(
                "{} ({} enrolled, {} skipped)",
                body["message"].as_str().unwrap_or("done"),
                body["enrolled"],
                body["skipped"]
            );
        }
        Commands::Recognize { image } => {
            let body = post_file(&client, &format!("{base}/recognize"), &image).await?;
            println!("{}", body["message"].as_str().unwrap_or_default());
            if let Some(names) = body["recognized_names"].as_array() {
                for name in names.iter().filter_map(|n| n.as_str()) {
                    println!("  {name}");
                }
            }
        }
        Commands::Attendance { output } => {
            let res = client
                .get(format!("{base}/view_attendance"))
                .send()
                .await
                .with_context(|| format!("cannot reach rollcalld at {base}"))?;
            if res.status() == StatusCode::NOT_FOUND {
                println!("No attendance recorded yet");
                return Ok(());
            }
            let bytes = check(res).await?.bytes().await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    println!("Saved attendance to {}", path.display());
                }
                None => {
                    let records = rollcall_core::ledger::parse_records(&bytes)?;
                    print!("{}", render_table(&records));
                }
            }
        }
        Commands::Status => {
            let res = client
                .get(format!("{base}/status"))
                .send()
                .await
                .with_context(|| format!("cannot reach rollcalld at {base}"))?;
            let body: serde_json::Value = check(res).await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

async fn post_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<serde_json::Value> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let form = Form::new().part("file", Part::bytes(bytes).file_name(filename));

    tracing::debug!(url, path = %path.display(), "uploading");
    let res = client
        .post(url)
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("cannot reach rollcalld at {url}"))?;
    Ok(check(res).await?.json().await?)
}

/// Turn a non-2xx response into an error carrying the daemon's message.
async fn check(res: reqwest::Response) -> Result<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let message = res
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|b| b["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    bail!("rollcalld: {message} ({status})")
}

fn render_table(records: &[AttendanceRecord]) -> String {
    let headers = ["Roll Number", "Name", "Timestamp"];
    let mut widths = headers.map(str::len);
    for r in records {
        widths[0] = widths[0].max(r.roll_number.chars().count());
        widths[1] = widths[1].max(r.name.chars().count());
        widths[2] = widths[2].max(r.timestamp.chars().count());
    }

    let line = |cells: [&str; 3]| {
        format!(
            "{:<w0$}  {:<w1$}  {}\n",
            cells[0],
            cells[1],
            cells[2],
            w0 = widths[0],
            w1 = widths[1]
        )
    };

    let mut out = line(headers);
    for r in records {
        out.push_str(&line([r.roll_number.as_str(), r.name.as_str(), r.timestamp.as_str()]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table_aligns_columns() {
        let records = vec![
            AttendanceRecord {
                roll_number: "2".into(),
                name: "Bartholomew".into(),
                timestamp: "2024-09-02 09:00:00".into(),
            },
            AttendanceRecord {
                roll_number: "10".into(),
                name: "Al".into(),
                timestamp: "2024-09-02 09:00:00".into(),
            },
        ];
        let table = render_table(&records);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Roll Number  Name         Timestamp");
        assert_eq!(lines[1], "2            Bartholomew  2024-09-02 09:00:00");
        assert_eq!(lines[2], "10           Al           2024-09-02 09:00:00");
    }

    #[test]
    fn test_cli_parses_server_and_output() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "--server",
            "http://10.0.0.5:5000",
            "attendance",
            "-o",
            "out.xlsx",
        ])
        .unwrap();
        assert_eq!(cli.server, "http://10.0.0.5:5000");
        assert!(matches!(cli.command, Commands::Attendance { output: Some(p) } if p == Path::new("out.xlsx")));
    }
}
