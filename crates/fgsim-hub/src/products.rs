use crate::error::ApiError;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Path as UrlPath, Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use fgsim_core::actions::{
    AckReply, ConvertReply, ManifestReply, OpenReply, ProductsQuery, ProductsRequest, WhichReply,
};
use fgsim_core::manifest::{Artifact, FrequencyId, Product, ProductManifest};
use futures_util::stream;
use sha2::{Digest, Sha256};
use std::{
    collections::HashSet,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    process::Stdio,
    sync::{Mutex, PoisonError},
};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{info, warn};

type CellKey = (String, FrequencyId);

const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

struct LoadedManifest {
    manifest: ProductManifest,
    root: PathBuf,
    source: PathBuf,
}

/// Server-side manifest state plus the in-flight convert registry.
pub struct ManifestStore {
    converter: Option<String>,
    loaded: RwLock<Option<LoadedManifest>>,
    converting: Mutex<HashSet<CellKey>>,
}

/// Marks one cell as converting until dropped.
struct ConvertClaim<'a> {
    registry: &'a Mutex<HashSet<CellKey>>,
    key: CellKey,
}

impl Drop for ConvertClaim<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl ManifestStore {
    pub fn new(converter: Option<String>) -> Self {
        Self {
            converter,
            loaded: RwLock::new(None),
            converting: Mutex::new(HashSet::new()),
        }
    }

    pub async fn load(&self, path: &Path) -> Result<usize, ApiError> {
        let raw = tokio::fs::read(path).await.map_err(|err| {
            ApiError::not_found(format!("cannot read manifest {}: {err}", path.display()))
        })?;
        let manifest: ProductManifest = serde_json::from_slice(&raw).map_err(|err| {
            ApiError::bad_request(format!("invalid manifest {}: {err}", path.display()))
        })?;
        if manifest.is_empty() {
            return Err(ApiError::bad_request(format!(
                "manifest {} is empty",
                path.display()
            )));
        }
        let source = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        let root = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let count = manifest.len();
        info!(
            event = "manifest_loaded",
            path = %source.display(),
            components = manifest.components().len(),
            products = count
        );
        *self.loaded.write().await = Some(LoadedManifest {
            manifest,
            root,
            source,
        });
        Ok(count)
    }

    /// The loaded manifest, or an empty one.
    pub async fn snapshot(&self) -> ProductManifest {
        self.loaded
            .read()
            .await
            .as_ref()
            .map(|loaded| loaded.manifest.clone())
            .unwrap_or_default()
    }

    pub async fn root(&self) -> Option<PathBuf> {
        self.loaded
            .read()
            .await
            .as_ref()
            .map(|loaded| loaded.root.clone())
    }

    pub async fn save(&self, outfile: &Path, clobber: bool) -> Result<(), ApiError> {
        let (manifest, source) = {
            let loaded = self.loaded.read().await;
            let loaded = loaded
                .as_ref()
                .ok_or_else(|| ApiError::bad_request("no manifest loaded"))?;
            (loaded.manifest.clone(), loaded.source.clone())
        };
        let exists = tokio::fs::try_exists(outfile).await.unwrap_or(false);
        if exists && !clobber {
            return Err(ApiError::conflict(format!(
                "file already exists: {}",
                outfile.display()
            )));
        }
        let rendered = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| ApiError::internal(format!("cannot encode manifest: {err}")))?;
        tokio::fs::write(outfile, rendered).await.map_err(|err| {
            ApiError::internal(format!("cannot write {}: {err}", outfile.display()))
        })?;
        info!(
            event = "manifest_saved",
            path = %outfile.display(),
            loaded_from = %source.display(),
            clobber = clobber
        );
        Ok(())
    }

    pub async fn reset(&self) {
        let previous = self.loaded.write().await.take();
        if let Some(previous) = previous {
            info!(event = "manifest_reset", path = %previous.source.display());
        }
    }

    fn claim(&self, key: CellKey) -> Result<ConvertClaim<'_>, ApiError> {
        let mut converting = self
            .converting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !converting.insert(key.clone()) {
            return Err(ApiError::conflict(format!(
                "conversion already in progress for {} at frequency id {}",
                key.0, key.1
            )));
        }
        Ok(ConvertClaim {
            registry: &self.converting,
            key,
        })
    }

    /// Generates the HPX image for one cell and updates only that cell.
    pub async fn convert(&self, comp_id: &str, freq_id: FrequencyId) -> Result<Product, ApiError> {
        let converter = self
            .converter
            .clone()
            .ok_or_else(|| ApiError::unavailable("no HPX converter configured"))?;
        let _claim = self.claim((comp_id.to_string(), freq_id))?;

        let (healpix, root) = {
            let loaded = self.loaded.read().await;
            let loaded = loaded
                .as_ref()
                .ok_or_else(|| ApiError::bad_request("no manifest loaded"))?;
            let product = loaded.manifest.get(comp_id, freq_id).ok_or_else(|| {
                ApiError::not_found(format!(
                    "no product for '{comp_id}' at frequency id {freq_id}"
                ))
            })?;
            (product.healpix.clone(), loaded.root.clone())
        };

        let hpx_rel = hpx_path_for(&healpix.path);
        let input = root.join(&healpix.path);
        let output = root.join(&hpx_rel);
        info!(
            event = "convert_start",
            component = comp_id,
            frequency = freq_id,
            input = %input.display()
        );
        let result = Command::new(&converter)
            .arg(&input)
            .arg(&output)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| ApiError::internal(format!("cannot run '{converter}': {err}")))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let detail = stderr.lines().last().unwrap_or_default().trim().to_string();
            warn!(event = "convert_failed", component = comp_id, frequency = freq_id, status = %result.status);
            return Err(ApiError::internal(format!(
                "conversion failed ({}): {detail}",
                result.status
            )));
        }

        let hpx = describe_artifact(&root, &hpx_rel).await?;
        let product = Product {
            healpix,
            hpx: Some(hpx),
        };
        let mut loaded = self.loaded.write().await;
        let loaded = loaded
            .as_mut()
            .ok_or_else(|| ApiError::conflict("manifest was reset during conversion"))?;
        loaded
            .manifest
            .replace(comp_id, freq_id, product.clone())?;
        info!(event = "convert_done", component = comp_id, frequency = freq_id);
        Ok(product)
    }

    /// Artifact path to show in a viewer: the HPX image when present.
    async fn viewable_path(&self, comp_id: &str, freq_id: FrequencyId) -> Result<PathBuf, ApiError> {
        let loaded = self.loaded.read().await;
        let loaded = loaded
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("no manifest loaded"))?;
        let product = loaded.manifest.get(comp_id, freq_id).ok_or_else(|| {
            ApiError::not_found(format!("no product for '{comp_id}' at frequency id {freq_id}"))
        })?;
        let artifact = product.hpx.as_ref().unwrap_or(&product.healpix);
        Ok(loaded.root.join(&artifact.path))
    }
}

/// `maps/ff_100.fits` -> `maps/ff_100_hpx.fits`.
pub fn hpx_path_for(healpix: &str) -> String {
    let base = healpix
        .strip_suffix(".fits.gz")
        .or_else(|| healpix.strip_suffix(".fits"))
        .unwrap_or(healpix);
    format!("{base}_hpx.fits")
}

pub async fn describe_artifact(root: &Path, relative: &str) -> Result<Artifact, ApiError> {
    let full = root.join(relative);
    let mut file = tokio::fs::File::open(&full)
        .await
        .map_err(|err| ApiError::internal(format!("cannot open {}: {err}", full.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|err| ApiError::internal(format!("cannot read {}: {err}", full.display())))?;
        if read == 0 {
            break;
        }
        size += read as u64;
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    let mut checksum = String::with_capacity(digest.len() * 2);
    for byte in digest {
        checksum.push_str(&format!("{byte:02x}"));
    }
    Ok(Artifact {
        path: relative.to_string(),
        size,
        checksum,
    })
}

/// Resolves a bare command name against `PATH`, or checks an explicit path.
pub fn which_cmd(cmd: &str) -> Result<PathBuf, String> {
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return Err("empty command".to_string());
    }
    if cmd.contains(std::path::MAIN_SEPARATOR) || cmd.contains('/') {
        let path = PathBuf::from(cmd);
        if is_executable(&path) {
            return Ok(path);
        }
        return Err(format!("not an executable file: {cmd}"));
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(cmd);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(format!("command not found: {cmd}"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Joins a download path under `root`, refusing anything that could escape it.
fn resolve_under(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim_start_matches('/'));
    let safe = relative
        .components()
        .all(|part| matches!(part, Component::Normal(_) | Component::CurDir));
    if !safe || relative.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(relative))
}

async fn open_viewer(
    state: &AppState,
    remote: SocketAddr,
    query: &ProductsQuery,
) -> Result<OpenReply, ApiError> {
    if !remote.ip().is_loopback() {
        return Err(ApiError::forbidden(
            "opening a viewer is only allowed for local clients",
        ));
    }
    let comp_id = query
        .comp_id
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing compID"))?;
    let freq_id = parse_freq_id(query.freq_id.as_deref())?;
    let viewer = query
        .viewer
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing viewer"))?;
    let viewer_path = which_cmd(viewer).map_err(ApiError::not_found)?;
    let target = state.products.viewable_path(comp_id, freq_id).await?;

    let mut child = Command::new(&viewer_path)
        .arg(&target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| {
            ApiError::internal(format!("cannot start {}: {err}", viewer_path.display()))
        })?;
    let pid = child.id().unwrap_or_default();
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
    info!(event = "viewer_started", viewer = %viewer_path.display(), target = %target.display(), pid = pid);
    Ok(OpenReply { pid })
}

fn parse_freq_id(raw: Option<&str>) -> Result<FrequencyId, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::bad_request("missing freqID"))?;
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid freqID: {raw}")))
}

pub async fn query(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    query: Result<Query<ProductsQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;
    match query.action.as_deref().unwrap_or("fetch") {
        "" | "fetch" => Ok(Json(ManifestReply {
            manifest: state.products.snapshot().await,
            localhost: remote.ip().is_loopback(),
        })
        .into_response()),
        "which" => {
            let cmd = query
                .cmd
                .as_deref()
                .map(str::trim)
                .filter(|cmd| !cmd.is_empty())
                .ok_or_else(|| ApiError::bad_request("missing cmd"))?;
            let path = which_cmd(cmd).map_err(ApiError::not_found)?;
            Ok(Json(WhichReply {
                cmd: cmd.to_string(),
                path: path.to_string_lossy().to_string(),
            })
            .into_response())
        }
        "open" => Ok(Json(open_viewer(&state, remote, &query).await?).into_response()),
        other => Err(ApiError::bad_request(format!("unknown action: {other}"))),
    }
}

pub async fn action(
    State(state): State<AppState>,
    payload: Result<Json<ProductsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    match request {
        ProductsRequest::Load { manifestfile } => {
            let count = state.products.load(Path::new(&manifestfile)).await?;
            Ok(Json(AckReply {
                message: format!("loaded {count} products from {manifestfile}"),
            })
            .into_response())
        }
        ProductsRequest::Save { outfile, clobber } => {
            state.products.save(Path::new(&outfile), clobber).await?;
            Ok(Json(AckReply {
                message: format!("manifest saved to {outfile}"),
            })
            .into_response())
        }
        ProductsRequest::Reset => {
            state.products.reset().await;
            Ok(Json(AckReply {
                message: "manifest reset".to_string(),
            })
            .into_response())
        }
        ProductsRequest::Convert { comp_id, freq_id } => {
            let data = state.products.convert(&comp_id, freq_id).await?;
            Ok(Json(ConvertReply { data }).into_response())
        }
    }
}

pub async fn download(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response, ApiError> {
    let root = state
        .products
        .root()
        .await
        .ok_or_else(|| ApiError::not_found("no manifest loaded"))?;
    let full = resolve_under(&root, &path)
        .ok_or_else(|| ApiError::bad_request(format!("invalid path: {path}")))?;
    let file = tokio::fs::File::open(&full)
        .await
        .map_err(|_| ApiError::not_found(format!("no such product file: {path}")))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| ApiError::internal(format!("cannot stat {path}: {err}")))?
        .len();
    let filename = full
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "product".to_string());
    info!(event = "download", path = %path, size = size);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        file_body(file),
    )
        .into_response())
}

/// Streams a product file in fixed-size chunks; maps can be far larger than memory allows.
fn file_body(file: tokio::fs::File) -> Body {
    let chunks = stream::unfold(Some(file), |file| async move {
        let Some(mut file) = file else {
            return None;
        };
        let mut buf = vec![0u8; DOWNLOAD_CHUNK_BYTES];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(read) => {
                buf.truncate(read);
                Some((Ok::<_, std::io::Error>(Bytes::from(buf)), Some(file)))
            }
            Err(err) => Some((Err(err), None)),
        }
    });
    Body::from_stream(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::TaskRunner;
    use crate::push::{PushConfig, PushHub};
    use axum::http::StatusCode;
    use fgsim_core::manifest::FrequencyAxis;
    use std::sync::Arc;
    use std::time::Duration;

    fn app_state(products: ManifestStore) -> AppState {
        let push = Arc::new(PushHub::new(PushConfig::default()));
        AppState {
            runner: Arc::new(TaskRunner::new(None, push.clone())),
            products: Arc::new(products),
            push,
        }
    }

    fn local() -> SocketAddr {
        "127.0.0.1:40000".parse().expect("addr")
    }

    fn write_artifact(root: &Path, relative: &str, body: &[u8]) -> Artifact {
        let full = root.join(relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(&full, body).expect("write artifact");
        Artifact {
            path: relative.to_string(),
            size: body.len() as u64,
            checksum: "unchecked".to_string(),
        }
    }

    fn write_manifest(root: &Path) -> PathBuf {
        let mut manifest =
            ProductManifest::new(FrequencyAxis::new("MHz", &[(0, 100.0), (1, 150.0)]));
        manifest.insert(
            "free-free",
            0,
            Product::new(write_artifact(root, "freefree/ff_100.fits", b"healpix-100")),
        );
        manifest.insert(
            "free-free",
            1,
            Product::new(write_artifact(root, "freefree/ff_150.fits", b"healpix-150")),
        );
        let path = root.join("manifest.json");
        std::fs::write(&path, serde_json::to_vec(&manifest).expect("encode")).expect("write");
        path
    }

    #[tokio::test]
    async fn save_then_load_round_trips_the_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ManifestStore::new(None);
        store
            .load(&write_manifest(dir.path()))
            .await
            .expect("load");
        let original = store.snapshot().await;

        let out = dir.path().join("saved.json");
        store.save(&out, true).await.expect("save");
        store.reset().await;
        assert!(store.snapshot().await.is_empty());

        store.load(&out).await.expect("reload");
        assert_eq!(store.snapshot().await, original);
    }

    #[tokio::test]
    async fn save_without_clobber_refuses_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ManifestStore::new(None);
        let path = write_manifest(dir.path());
        store.load(&path).await.expect("load");

        let err = store.save(&path, false).await.expect_err("exists");
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);
        store.save(&path, true).await.expect("clobber");
    }

    #[tokio::test]
    async fn save_and_convert_need_a_loaded_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ManifestStore::new(Some("cp".to_string()));
        let err = store
            .save(&dir.path().join("out.json"), true)
            .await
            .expect_err("nothing loaded");
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        let err = store.convert("free-free", 0).await.expect_err("nothing loaded");
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn convert_adds_hpx_and_keeps_healpix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ManifestStore::new(Some("cp".to_string()));
        store
            .load(&write_manifest(dir.path()))
            .await
            .expect("load");
        let before = store.snapshot().await;

        let product = store.convert("free-free", 1).await.expect("convert");
        let hpx = product.hpx.as_ref().expect("hpx artifact");
        assert_eq!(hpx.path, "freefree/ff_150_hpx.fits");
        assert_eq!(hpx.size, b"healpix-150".len() as u64);
        assert_eq!(hpx.checksum.len(), 64);
        assert_eq!(
            product.healpix,
            before.get("free-free", 1).expect("cell").healpix
        );

        let after = store.snapshot().await;
        assert_eq!(after.get("free-free", 1), Some(&product));
        assert_eq!(after.get("free-free", 0), before.get("free-free", 0));
    }

    #[tokio::test]
    async fn convert_rejects_a_cell_already_in_flight() {
        let store = ManifestStore::new(Some("cp".to_string()));
        let _held = store
            .claim(("free-free".to_string(), 0))
            .expect("first claim");
        let err = store.convert("free-free", 0).await.expect_err("in flight");
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);

        drop(_held);
        assert!(store.claim(("free-free".to_string(), 0)).is_ok());
    }

    #[test]
    fn hpx_names_follow_the_healpix_file() {
        assert_eq!(hpx_path_for("maps/ff_100.fits"), "maps/ff_100_hpx.fits");
        assert_eq!(hpx_path_for("ff.fits.gz"), "ff_hpx.fits");
        assert_eq!(hpx_path_for("ff"), "ff_hpx.fits");
    }

    #[test]
    fn download_paths_cannot_escape_the_root() {
        let root = Path::new("/data/run1");
        assert_eq!(
            resolve_under(root, "/freefree/ff.fits"),
            Some(PathBuf::from("/data/run1/freefree/ff.fits"))
        );
        assert_eq!(resolve_under(root, "../secrets"), None);
        assert_eq!(resolve_under(root, ""), None);
    }

    #[cfg(unix)]
    #[test]
    fn which_resolves_path_entries_and_rejects_unknown_names() {
        assert!(which_cmd("sh").is_ok());
        let err = which_cmd("nonexistent-cmd-fgsim").expect_err("missing");
        assert_eq!(err, "command not found: nonexistent-cmd-fgsim");
        assert!(which_cmd("/etc/hostname-does-not-exist").is_err());
        assert!(which_cmd("  ").is_err());
    }

    #[tokio::test]
    async fn which_without_cmd_is_a_bad_request() {
        let state = app_state(ManifestStore::new(None));
        let request = ProductsQuery {
            action: Some("which".to_string()),
            ..ProductsQuery::default()
        };
        let Err(err) = query(State(state), ConnectInfo(local()), Ok(Query(request))).await else {
            panic!("which without cmd must fail");
        };
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    /// `sh` stands in for the viewer: "viewing" the map runs it, which drops `marker`.
    #[cfg(unix)]
    async fn state_with_marker_map(root: &Path, marker: &Path) -> AppState {
        let mut manifest = ProductManifest::new(FrequencyAxis::new("MHz", &[(0, 100.0)]));
        let script = format!("echo viewed > '{}'\n", marker.display());
        manifest.insert(
            "free-free",
            0,
            Product::new(write_artifact(root, "freefree/ff_100.fits", script.as_bytes())),
        );
        let path = root.join("manifest.json");
        std::fs::write(&path, serde_json::to_vec(&manifest).expect("encode")).expect("write");
        let store = ManifestStore::new(None);
        store.load(&path).await.expect("load");
        app_state(store)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn open_from_a_remote_caller_is_forbidden_and_spawns_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("viewed");
        let state = state_with_marker_map(dir.path(), &marker).await;

        let remote: SocketAddr = "10.0.0.5:1234".parse().expect("addr");
        let err = open_viewer(&state, remote, &ProductsQuery::open("free-free", 0, "sh"))
            .await
            .expect_err("remote open");
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn open_from_loopback_starts_the_viewer_on_the_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("viewed");
        let state = state_with_marker_map(dir.path(), &marker).await;

        let reply = open_viewer(&state, local(), &ProductsQuery::open("free-free", 0, "sh"))
            .await
            .expect("local open");
        assert!(reply.pid > 0);

        for _ in 0..250 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn download_streams_product_files_once_a_manifest_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state(ManifestStore::new(None));
        let file = "freefree/ff_100.fits".to_string();

        let Err(err) = download(State(state.clone()), UrlPath(file.clone())).await else {
            panic!("download before load must fail");
        };
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        state
            .products
            .load(&write_manifest(dir.path()))
            .await
            .expect("load");
        let Ok(response) = download(State(state.clone()), UrlPath(file)).await else {
            panic!("download after load must succeed");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            b"healpix-100".len().to_string()
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"healpix-100");

        let Err(err) = download(State(state), UrlPath("freefree/missing.fits".to_string())).await
        else {
            panic!("missing file must fail");
        };
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
