use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceid::{
    config, CredentialIssuer, FaceAuth, FaceIdError, FaceRegion, FeatureExtractor,
    FileIdentityStore, JsonProfileStore, JwtIssuer, NoProfiles, Pipeline,
};
use image::DynamicImage;
use log::{error, info, warn};
use serde_json::json;

/// Exit code for server-side failures, including setup (config, secrets, models).
const SETUP_FAILURE: u8 = 4;

#[derive(Parser)]
#[command(name = "faceid")]
#[command(version, about = "Face enrollment and verification against an identity store")]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face in an image for an identity, replacing any earlier enrollment
    Enroll {
        /// Identity (email) to bind the face to
        #[arg(short, long)]
        identity: String,
        /// Photo containing the face
        #[arg(long)]
        image: PathBuf,
    },
    /// Verify the face in an image against an enrolled identity
    Verify {
        #[arg(short, long)]
        identity: String,
        #[arg(long)]
        image: PathBuf,
    },
    /// Remove the enrolled face for an identity
    Purge {
        #[arg(short, long)]
        identity: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(SETUP_FAILURE)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Enroll { identity, image } => {
            let cfg = config::load_config(config_path)?;
            let bytes = read_image(&image)?;
            let store = FileIdentityStore::new(&cfg.store_dir);
            let mut auth = FaceAuth::new(
                load_pipeline(&cfg)?,
                &store,
                NoProfiles,
                NoIssuer,
                cfg.match_policy()?,
            )
            .with_face_selection(cfg.face_selection);

            let result = auth.enroll(&identity, &bytes).map(|record| {
                (200, json!({ "identity": record.identity, "embedding": record.embedding }))
            });
            respond(result)
        }
        Commands::Verify { identity, image } => {
            let cfg = config::load_config(config_path)?;
            let bytes = read_image(&image)?;
            let store = FileIdentityStore::new(&cfg.store_dir);
            let issuer = JwtIssuer::from_config(&cfg.credential)
                .context("Failed to initialize credential issuer")?;
            let mut auth = FaceAuth::new(
                load_pipeline(&cfg)?,
                &store,
                JsonProfileStore::new(&cfg.profiles),
                issuer,
                cfg.match_policy()?,
            )
            .with_face_selection(cfg.face_selection);

            let result = match auth.verify(&identity, &bytes) {
                Ok(outcome) => {
                    let body = serde_json::to_value(&outcome)
                        .context("serializing verification outcome")?;
                    Ok((outcome.http_status(), body))
                }
                Err(err) => Err(err),
            };
            respond(result)
        }
        Commands::Purge { identity } => {
            let cfg = config::load_config(config_path)?;
            let store = FileIdentityStore::new(&cfg.store_dir);
            let auth = FaceAuth::new(
                NoExtractor,
                &store,
                NoProfiles,
                NoIssuer,
                cfg.match_policy()?,
            );

            let result = auth.purge(&identity).map(|removed| {
                (200, json!({ "identity": identity.trim(), "removed": removed }))
            });
            respond(result)
        }
        Commands::Config => {
            open_config(config_path)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print the response body and turn its status into an exit code.
fn respond(result: Result<(u16, serde_json::Value), FaceIdError>) -> Result<ExitCode> {
    let (status, body) = match result {
        Ok(ok) => ok,
        Err(err) => {
            if err.kind().is_recoverable() {
                warn!("{err}");
            } else {
                error!("{err}");
            }
            (err.http_status(), err.to_body())
        }
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&body).context("serializing response body")?
    );
    info!("status {status}");
    Ok(ExitCode::from(exit_code(status)))
}

fn exit_code(status: u16) -> u8 {
    match status {
        200 => 0,
        401 => 1,
        400 => 2,
        404 => 3,
        _ => SETUP_FAILURE,
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn load_pipeline(cfg: &config::Config) -> Result<Pipeline> {
    Pipeline::new(&cfg.model_paths(), cfg.detector_params())
        .context("Failed to initialize face recognition pipeline")
}

/// Stand-in for commands that never issue credentials.
struct NoIssuer;

impl CredentialIssuer for NoIssuer {
    fn issue(&self, _identity: &str) -> Result<String> {
        anyhow::bail!("credential issuing is not available for this command")
    }
}

/// Stand-in for commands that never look at pixels.
struct NoExtractor;

impl FeatureExtractor for NoExtractor {
    fn detect_faces(&mut self, _image: &DynamicImage) -> Result<Vec<FaceRegion>> {
        anyhow::bail!("face extraction is not available for this command")
    }

    fn extract_embedding(
        &mut self,
        _image: &DynamicImage,
        _region: &FaceRegion,
    ) -> Result<Vec<f32>> {
        anyhow::bail!("face extraction is not available for this command")
    }
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_and_setup_failure_exit_differently() {
        assert_eq!(exit_code(200), 0);
        assert_eq!(exit_code(401), 1);
        assert_eq!(exit_code(400), 2);
        assert_eq!(exit_code(404), 3);
        assert_eq!(exit_code(500), SETUP_FAILURE);
        assert_ne!(exit_code(401), SETUP_FAILURE);
    }

    #[test]
    fn missing_signing_secret_fails_setup() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "[credential]\nsecret_env = \"FACEID_TEST_SECRET_THAT_IS_NEVER_SET\"\n",
        )
        .unwrap();
        let image = tmp.path().join("probe.png");
        std::fs::write(&image, b"png").unwrap();

        let cli = Cli::parse_from([
            "faceid",
            "--config",
            path.to_str().unwrap(),
            "verify",
            "--identity",
            "a@x.com",
            "--image",
            image.to_str().unwrap(),
        ]);
        assert!(run(cli).is_err());
    }
}
