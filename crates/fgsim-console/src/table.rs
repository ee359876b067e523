use fgsim_core::{Artifact, FrequencyId, ProductManifest};

/// What the manifest table shows; rebuilt from scratch on every render.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestTable {
    pub headers: Vec<String>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub frequency_id: FrequencyId,
    pub label: String,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableCell {
    pub component: String,
    pub frequency_id: FrequencyId,
    pub healpix: Option<Artifact>,
    pub hpx: Option<Artifact>,
    /// Opening in a viewer only works when the console shares a host with the hub.
    pub can_open: bool,
}

impl TableCell {
    pub fn is_present(&self) -> bool {
        self.healpix.is_some()
    }

    pub fn can_convert(&self) -> bool {
        self.healpix.is_some() && self.hpx.is_none()
    }
}

impl ManifestTable {
    pub fn project(manifest: &ProductManifest, is_local: bool) -> Self {
        let unit = manifest.frequency.unit.trim();
        let first = if unit.is_empty() {
            "Frequency".to_string()
        } else {
            format!("Frequency [{unit}]")
        };
        let mut headers = Vec::with_capacity(manifest.components().len() + 1);
        headers.push(first);
        headers.extend(manifest.components().iter().cloned());

        let rows = manifest
            .frequency
            .ids
            .iter()
            .map(|&frequency_id| TableRow {
                frequency_id,
                label: manifest.frequency.label(frequency_id),
                cells: manifest
                    .components()
                    .iter()
                    .map(|component| {
                        let product = manifest.get(component, frequency_id);
                        TableCell {
                            component: component.clone(),
                            frequency_id,
                            healpix: product.map(|p| p.healpix.clone()),
                            hpx: product.and_then(|p| p.hpx.clone()),
                            can_open: is_local && product.is_some(),
                        }
                    })
                    .collect(),
            })
            .collect();

        Self { headers, rows }
    }

    pub fn data_columns(&self) -> usize {
        self.headers.len().saturating_sub(1)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&TableCell> {
        self.rows.get(row).and_then(|r| r.cells.get(column))
    }
}
