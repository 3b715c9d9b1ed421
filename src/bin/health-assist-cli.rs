use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use health_assist::client::FlowRunnerClientWrapper;
use health_assist::codec::{MsgPackCodec, PayloadCodec};
use health_assist::media::AudioRecording;
use health_assist::shapes::{self, ClinicalTranscriptionInput, ClinicalTranscriptionOutput};
use serde_json::Value;
use tokio::io::AsyncReadExt;

const CHUNK_BYTES: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "health-assist-cli")]
#[command(about = "CLI client for the health-assist FlowRunner gRPC service")]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "http://localhost:50051", global = true)]
    server: String,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 60, global = true)]
    timeout: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Msgpack,
}

#[derive(Subcommand)]
enum Command {
    /// Run any flow with a JSON request
    Run {
        /// Flow id, e.g. "symptom-analysis"
        #[arg(long)]
        flow: String,

        /// Input file path (use "-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: String,
    },
    /// Transcribe a recorded clinical note
    Transcribe {
        #[arg(long)]
        audio: PathBuf,

        /// MIME type of the recording
        #[arg(long, default_value = "audio/webm")]
        mime: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    eprintln!("Connecting to FlowRunner at {}...", cli.server);
    let mut client = FlowRunnerClientWrapper::connect(cli.server.clone()).await?;

    let output: Value = match cli.command {
        Command::Run { flow, input } => {
            let input: Value = serde_json::from_str(&read_input(&input)?)
                .context("Failed to parse input JSON")?;
            eprintln!("Running flow '{flow}'...");
            client.run_flow_with_timeout(&flow, &input, timeout).await?
        }
        Command::Transcribe { audio, mime } => {
            let recording = record_file(&audio).await?;
            eprintln!("Transcribing {} bytes of {mime}...", recording.len());
            let uri = recording
                .finish(&mime)
                .map_err(|e| anyhow!("{}: {e}", audio.display()))?;
            let input = ClinicalTranscriptionInput {
                audio_data_uri: uri.to_string(),
            };
            let output: ClinicalTranscriptionOutput = client
                .run_flow_with_timeout(shapes::clinical_transcription::ID, &input, timeout)
                .await?;
            serde_json::to_value(output)?
        }
    };

    match cli.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        Format::Msgpack => {
            let bytes = MsgPackCodec.encode(&output)?;
            io::stdout()
                .write_all(&bytes)
                .context("Failed to write output")?;
        }
    }

    Ok(())
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read input file {path}"))
    }
}

/// Feed the file to the recorder chunk by chunk, as a microphone would.
async fn record_file(path: &PathBuf) -> Result<AudioRecording> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut recording = AudioRecording::new();
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        recording.push_chunk(&buf[..n]);
    }
    Ok(recording)
}
