use crate::actions::Action;
use crate::table::ManifestTable;
use crate::validator::ExecutableValidator;
use crate::LocalRejection;
use fgsim_core::actions::{download_url, ManifestReply};
use fgsim_core::{FrequencyId, Product, ProductManifest};
use tracing::warn;

/// Client mirror of the hub's manifest. `None` means "not loaded".
#[derive(Debug, Default)]
pub struct ManifestManager {
    manifest: Option<ProductManifest>,
    is_local: bool,
}

impl ManifestManager {
    pub fn manifest(&self) -> Option<&ProductManifest> {
        self.manifest.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.manifest.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn table(&self) -> Option<ManifestTable> {
        self.manifest
            .as_ref()
            .map(|manifest| ManifestTable::project(manifest, self.is_local))
    }

    pub fn load(&self, path: &str) -> Result<Action, LocalRejection> {
        let path = non_empty(path, "manifest path")?;
        Ok(Action::LoadManifest { path })
    }

    pub fn fetch(&self) -> Action {
        Action::FetchManifest
    }

    pub fn on_fetched(&mut self, reply: ManifestReply) {
        self.is_local = reply.localhost;
        self.manifest = if reply.manifest.is_empty() {
            None
        } else {
            Some(reply.manifest)
        };
    }

    pub fn save(&self, path: &str, clobber: bool) -> Result<Action, LocalRejection> {
        let path = non_empty(path, "output path")?;
        Ok(Action::SaveManifest { path, clobber })
    }

    pub fn reset(&self) -> Action {
        Action::ResetManifest
    }

    /// Only called once the hub confirmed the reset.
    pub fn on_reset(&mut self) {
        self.manifest = None;
    }

    pub fn convert(&self, comp_id: &str, freq_id: FrequencyId) -> Result<Action, LocalRejection> {
        self.product(comp_id, freq_id)?;
        Ok(Action::Convert {
            comp_id: comp_id.to_string(),
            freq_id,
        })
    }

    /// Replaces exactly one cell. A reply for a cell no longer in the table is dropped.
    pub fn on_converted(&mut self, comp_id: &str, freq_id: FrequencyId, product: Product) {
        let Some(manifest) = self.manifest.as_mut() else {
            warn!(event = "convert_after_reset", component = comp_id, frequency = freq_id);
            return;
        };
        if let Err(err) = manifest.replace(comp_id, freq_id, product) {
            warn!(event = "convert_unknown_cell", error = %err);
        }
    }

    pub fn open(
        &self,
        comp_id: &str,
        freq_id: FrequencyId,
        viewer: Option<&str>,
        validator: &ExecutableValidator,
    ) -> Result<Action, LocalRejection> {
        let viewer = viewer
            .map(str::trim)
            .filter(|viewer| !viewer.is_empty())
            .ok_or(LocalRejection::NoViewer)?;
        if !validator.is_valid(viewer) {
            return Err(LocalRejection::ViewerNotValidated(viewer.to_string()));
        }
        self.product(comp_id, freq_id)?;
        Ok(Action::Open {
            comp_id: comp_id.to_string(),
            freq_id,
            viewer: viewer.to_string(),
        })
    }

    /// Retrieval URL for a cell's HPX image, or its HEALPix map when `hpx` is false
    /// or no HPX image exists yet.
    pub fn download(
        &self,
        base_url: &str,
        comp_id: &str,
        freq_id: FrequencyId,
        hpx: bool,
    ) -> Result<Action, LocalRejection> {
        let product = self.product(comp_id, freq_id)?;
        let artifact = match (&product.hpx, hpx) {
            (Some(image), true) => image,
            _ => &product.healpix,
        };
        Ok(Action::Download {
            url: download_url(base_url, &artifact.path),
        })
    }

    fn product(&self, comp_id: &str, freq_id: FrequencyId) -> Result<&Product, LocalRejection> {
        let manifest = self.manifest.as_ref().ok_or(LocalRejection::NoManifest)?;
        manifest
            .get(comp_id, freq_id)
            .ok_or_else(|| LocalRejection::UnknownCell {
                component: comp_id.to_string(),
                frequency: freq_id,
            })
    }
}

fn non_empty(value: &str, what: &'static str) -> Result<String, LocalRejection> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LocalRejection::EmptyArgument(what));
    }
    Ok(value.to_string())
}
