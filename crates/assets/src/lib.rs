use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use hf_hub::api::sync::ApiBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const BASE_MODEL_REPO: &str = "liuhaotian/llava-v1.5-13b";
pub const VISION_TOWER_REPO: &str = "openai/clip-vit-large-patch14-336";
pub const CUSTOM_WEIGHTS_ARCHIVE: &str = "custom_weights.tar";

const USER_AGENT: &str = concat!("llava-predict-rs/", env!("CARGO_PKG_VERSION"));

/// A set of files to mirror from one Hugging Face repository into `dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightSource {
    pub repo: String,
    pub dest: PathBuf,
    pub files: Vec<String>,
}

impl WeightSource {
    pub fn missing_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .map(String::as_str)
            .filter(|file| !self.dest.join(file).is_file())
            .collect()
    }
}

pub fn default_weight_sources() -> Vec<WeightSource> {
    vec![
        WeightSource {
            repo: BASE_MODEL_REPO.to_string(),
            dest: PathBuf::from(BASE_MODEL_REPO),
            files: [
                "config.json",
                "generation_config.json",
                "pytorch_model-00001-of-00003.bin",
                "pytorch_model-00002-of-00003.bin",
                "pytorch_model-00003-of-00003.bin",
                "pytorch_model.bin.index.json",
                "special_tokens_map.json",
                "tokenizer.model",
                "tokenizer_config.json",
            ]
            .map(str::to_string)
            .to_vec(),
        },
        WeightSource {
            repo: VISION_TOWER_REPO.to_string(),
            dest: PathBuf::from(VISION_TOWER_REPO),
            files: ["config.json", "preprocessor_config.json", "pytorch_model.bin"]
                .map(str::to_string)
                .to_vec(),
        },
    ]
}

pub fn is_url(value: &str) -> bool {
    ["http://", "https://", "gs://", "s3://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// URLs that [`download_url`] can fetch.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Fetch every missing file of every source. Files already present under
/// `dest` are left untouched; `cache_dir` backs the hub client.
pub fn download_weights(sources: &[WeightSource], cache_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut fetched = Vec::new();
    let pending: Vec<_> = sources
        .iter()
        .map(|source| (source, source.missing_files()))
        .filter(|(_, missing)| !missing.is_empty())
        .collect();
    if pending.is_empty() {
        debug!("all default weights already present");
        return Ok(fetched);
    }

    let api = ApiBuilder::new()
        .with_cache_dir(cache_dir.to_path_buf())
        .build()
        .context("failed to initialise Hugging Face API client")?;
    for (source, missing) in pending {
        let repo = api.model(source.repo.clone());
        for file in missing {
            info!(repo = %source.repo, file, "downloading weight file");
            let cached = repo
                .get(file)
                .with_context(|| format!("failed to download {file} from {}", source.repo))?;
            let target = source.dest.join(file);
            copy_into_place(&cached, &target)?;
            fetched.push(target);
        }
    }
    Ok(fetched)
}

fn copy_into_place(cached: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    if target.exists() && !target.is_file() {
        return Err(anyhow!(
            "download target {} exists but is not a file",
            target.display()
        ));
    }
    if target != cached {
        fs::copy(cached, target).with_context(|| {
            format!(
                "failed to copy cached file {} to {}",
                cached.display(),
                target.display()
            )
        })?;
    }
    Ok(())
}

/// Replace `dir` with the contents of a custom weights tarball.
///
/// `source` is either a URL, downloaded to `dir/custom_weights.tar`, or a
/// local archive that is extracted directly. Any previous contents of `dir`
/// are removed first.
pub fn fetch_custom_weights(source: &str, dir: &Path) -> Result<PathBuf> {
    ensure!(
        !is_url(source) || is_http_url(source),
        "unsupported custom weights URL {source}: only http(s) downloads are supported"
    );
    let local = (!is_url(source)).then(|| PathBuf::from(source));
    if let Some(archive) = &local {
        ensure!(
            archive.is_file(),
            "custom weights archive {} does not exist",
            archive.display()
        );
        ensure!(
            !archive.starts_with(dir),
            "custom weights archive {} lives inside {}, which is about to be cleared",
            archive.display(),
            dir.display()
        );
    }

    reset_dir(dir)?;
    let archive = match local {
        Some(archive) => archive,
        None => {
            let target = dir.join(CUSTOM_WEIGHTS_ARCHIVE);
            download_url(source, &target)?;
            target
        }
    };
    extract_tar(&archive, dir)?;
    info!(dir = %dir.display(), "custom weights ready");
    Ok(dir.to_path_buf())
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        debug!(dir = %dir.display(), "removing previous custom weights");
        fs::remove_dir_all(dir)
            .with_context(|| format!("failed to remove directory {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("failed to create directory {}", dir.display()))
}

pub fn download_url(url: &str, target: &Path) -> Result<()> {
    info!(url, target = %target.display(), "downloading");
    let response = ureq::get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .with_context(|| format!("failed to fetch {url}"))?;
    if response.status() != 200 {
        return Err(anyhow!("{url} returned status {}", response.status()));
    }

    let mut file = fs::File::create(target)
        .with_context(|| format!("failed to create file {}", target.display()))?;
    std::io::copy(&mut response.into_reader(), &mut file)
        .with_context(|| format!("failed to write file {}", target.display()))?;
    Ok(())
}

pub fn extract_tar(archive: &Path, dir: &Path) -> Result<()> {
    let file = fs::File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    tar::Archive::new(file)
        .unpack(dir)
        .with_context(|| format!("failed to extract {} into {}", archive.display(), dir.display()))
}
