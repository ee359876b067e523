//! Product manifest: every generated artifact, keyed by `(component, frequency id)`.
//!
//! Wire form (a JSON object whose key order is the component order):
//!
//! ```json
//! {
//!   "frequency": {"unit": "MHz", "id": [0, 1], "frequencies": [100.0, 150.0]},
//!   "free-free": {
//!     "0": {"healpix": {"path": "freefree/ff_100.fits", "size": 1024, "checksum": "…"}},
//!     "1": {"healpix": {…}, "hpx": {…}}
//!   }
//! }
//! ```

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub type ComponentId = String;
pub type FrequencyId = u32;

const FREQUENCY_KEY: &str = "frequency";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("no product for component '{component}' at frequency id {frequency}")]
    UnknownCell {
        component: ComponentId,
        frequency: FrequencyId,
    },
    #[error("invalid frequency table: {0}")]
    Frequency(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the manifest's directory on the server.
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub healpix: Artifact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpx: Option<Artifact>,
}

impl Product {
    pub fn new(healpix: Artifact) -> Self {
        Self { healpix, hpx: None }
    }

    pub fn has_hpx(&self) -> bool {
        self.hpx.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrequencyWire", into = "FrequencyWire")]
pub struct FrequencyAxis {
    pub unit: String,
    pub ids: Vec<FrequencyId>,
    pub values: BTreeMap<FrequencyId, f64>,
}

#[derive(Serialize, Deserialize)]
struct FrequencyWire {
    #[serde(default)]
    unit: String,
    #[serde(default)]
    id: Vec<FrequencyId>,
    #[serde(default)]
    frequencies: Vec<f64>,
}

impl TryFrom<FrequencyWire> for FrequencyAxis {
    type Error = ManifestError;

    fn try_from(wire: FrequencyWire) -> Result<Self, Self::Error> {
        if wire.id.len() != wire.frequencies.len() {
            return Err(ManifestError::Frequency(format!(
                "{} ids but {} frequencies",
                wire.id.len(),
                wire.frequencies.len()
            )));
        }
        let mut values = BTreeMap::new();
        for (id, value) in wire.id.iter().zip(wire.frequencies) {
            if values.insert(*id, value).is_some() {
                return Err(ManifestError::Frequency(format!("duplicate id {id}")));
            }
        }
        Ok(Self {
            unit: wire.unit,
            ids: wire.id,
            values,
        })
    }
}

impl From<FrequencyAxis> for FrequencyWire {
    fn from(axis: FrequencyAxis) -> Self {
        let frequencies = axis
            .ids
            .iter()
            .map(|id| axis.values.get(id).copied().unwrap_or_default())
            .collect();
        Self {
            unit: axis.unit,
            id: axis.ids,
            frequencies,
        }
    }
}

impl FrequencyAxis {
    pub fn new(unit: impl Into<String>, pairs: &[(FrequencyId, f64)]) -> Self {
        Self {
            unit: unit.into(),
            ids: pairs.iter().map(|(id, _)| *id).collect(),
            values: pairs.iter().copied().collect(),
        }
    }

    pub fn value(&self, id: FrequencyId) -> Option<f64> {
        self.values.get(&id).copied()
    }

    /// Row label for a frequency id: its value, or the bare id when unknown.
    pub fn label(&self, id: FrequencyId) -> String {
        match self.value(id) {
            Some(value) => format!("{value}"),
            None => format!("#{id}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductManifest {
    pub frequency: FrequencyAxis,
    components: Vec<ComponentId>,
    products: BTreeMap<(ComponentId, FrequencyId), Product>,
}

impl ProductManifest {
    pub fn new(frequency: FrequencyAxis) -> Self {
        Self {
            frequency,
            components: Vec::new(),
            products: BTreeMap::new(),
        }
    }

    /// A fetched manifest with neither components nor frequencies means "not loaded".
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.frequency.ids.is_empty()
    }

    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn insert(&mut self, component: &str, frequency: FrequencyId, product: Product) {
        if !self.components.iter().any(|c| c == component) {
            self.components.push(component.to_string());
        }
        self.products
            .insert((component.to_string(), frequency), product);
    }

    pub fn get(&self, component: &str, frequency: FrequencyId) -> Option<&Product> {
        self.products.get(&(component.to_string(), frequency))
    }

    /// Replaces one existing cell in place and returns the previous product.
    pub fn replace(
        &mut self,
        component: &str,
        frequency: FrequencyId,
        product: Product,
    ) -> Result<Product, ManifestError> {
        match self.products.get_mut(&(component.to_string(), frequency)) {
            Some(slot) => Ok(std::mem::replace(slot, product)),
            None => Err(ManifestError::UnknownCell {
                component: component.to_string(),
                frequency,
            }),
        }
    }

    pub fn component_products<'a>(
        &'a self,
        component: &'a str,
    ) -> impl Iterator<Item = (FrequencyId, &'a Product)> + 'a {
        self.products
            .iter()
            .filter(move |((comp, _), _)| comp == component)
            .map(|((_, freq), product)| (*freq, product))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FrequencyId, &Product)> {
        self.products
            .iter()
            .map(|((comp, freq), product)| (comp.as_str(), *freq, product))
    }
}

struct ComponentCells<'a> {
    manifest: &'a ProductManifest,
    component: &'a str,
}

impl Serialize for ComponentCells<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        for (freq, product) in self.manifest.component_products(self.component) {
            map.serialize_entry(&freq.to_string(), product)?;
        }
        map.end()
    }
}

impl Serialize for ProductManifest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.is_empty() {
            return serializer.serialize_map(Some(0))?.end();
        }
        let mut map = serializer.serialize_map(Some(self.components.len() + 1))?;
        map.serialize_entry(FREQUENCY_KEY, &self.frequency)?;
        for component in &self.components {
            map.serialize_entry(
                component,
                &ComponentCells {
                    manifest: self,
                    component,
                },
            )?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProductManifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = ProductManifest;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a product manifest object")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut manifest = ProductManifest::default();
                while let Some(key) = access.next_key::<String>()? {
                    if key == FREQUENCY_KEY {
                        manifest.frequency = access.next_value()?;
                        continue;
                    }
                    let cells: BTreeMap<String, Product> = access.next_value()?;
                    if !manifest.components.contains(&key) {
                        manifest.components.push(key.clone());
                    }
                    for (raw_id, product) in cells {
                        let freq = raw_id.trim().parse::<FrequencyId>().map_err(|err| {
                            de::Error::custom(format!(
                                "invalid frequency id '{raw_id}' for '{key}': {err}"
                            ))
                        })?;
                        manifest.products.insert((key.clone(), freq), product);
                    }
                }
                Ok(manifest)
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(path: &str) -> Artifact {
        Artifact {
            path: path.to_string(),
            size: 1024,
            checksum: format!("sum-{path}"),
        }
    }

    fn sample() -> ProductManifest {
        let mut manifest =
            ProductManifest::new(FrequencyAxis::new("MHz", &[(0, 100.0), (1, 150.0)]));
        manifest.insert("galactic/synchrotron", 0, Product::new(artifact("sync_100.fits")));
        manifest.insert("galactic/synchrotron", 1, Product::new(artifact("sync_150.fits")));
        manifest.insert(
            "galactic/freefree",
            0,
            Product {
                healpix: artifact("ff_100.fits"),
                hpx: Some(artifact("ff_100_hpx.fits")),
            },
        );
        manifest
    }

    #[test]
    fn json_preserves_component_order_and_cells() {
        let manifest = sample();
        let json = serde_json::to_string(&manifest).expect("serialize");
        let sync_at = json.find("galactic/synchrotron").expect("sync key");
        let ff_at = json.find("galactic/freefree").expect("ff key");
        assert!(json.starts_with("{\"frequency\""));
        assert!(sync_at < ff_at);

        let parsed: ProductManifest = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, manifest);
        assert_eq!(
            parsed.components(),
            &["galactic/synchrotron".to_string(), "galactic/freefree".to_string()]
        );
        assert!(parsed.get("galactic/freefree", 0).expect("cell").has_hpx());
    }

    #[test]
    fn empty_object_is_an_unloaded_manifest() {
        let parsed: ProductManifest = serde_json::from_str("{}").expect("parse");
        assert!(parsed.is_empty());
        assert_eq!(serde_json::to_string(&parsed).expect("serialize"), "{}");
    }

    #[test]
    fn frequency_table_must_be_aligned() {
        let err = serde_json::from_str::<ProductManifest>(
            r#"{"frequency":{"unit":"MHz","id":[0,1],"frequencies":[100.0]}}"#,
        )
        .expect_err("misaligned");
        assert!(err.to_string().contains("2 ids but 1 frequencies"));
    }

    #[test]
    fn replace_only_touches_the_addressed_cell() {
        let mut manifest = sample();
        let converted = Product {
            healpix: artifact("sync_150.fits"),
            hpx: Some(artifact("sync_150_hpx.fits")),
        };
        let previous = manifest
            .replace("galactic/synchrotron", 1, converted.clone())
            .expect("replace");
        assert!(!previous.has_hpx());
        assert_eq!(manifest.get("galactic/synchrotron", 1), Some(&converted));
        assert!(!manifest.get("galactic/synchrotron", 0).expect("cell").has_hpx());

        let err = manifest
            .replace("galactic/dust", 0, converted)
            .expect_err("unknown cell");
        assert!(matches!(err, ManifestError::UnknownCell { .. }));
    }

    #[test]
    fn labels_render_whole_numbers_without_fraction() {
        let axis = FrequencyAxis::new("MHz", &[(0, 100.0), (1, 150.5)]);
        assert_eq!(axis.label(0), "100");
        assert_eq!(axis.label(1), "150.5");
        assert_eq!(axis.label(7), "#7");
    }
}
