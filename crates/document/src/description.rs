use std::path::PathBuf;

use chunky::ChunkyImage;
use image::RgbaImage;
use log::{info, warn};
use model::ImageSize;
use serde::{Deserialize, Serialize};

use crate::member::{MemberKind, StructureMember};
use crate::{Document, HistoryConfig};

/// Flat interchange form of a document. Layers are listed bottom to top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDescription {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<LayerDescription>,
}

/// One layer. `pixels` is straight-alpha RGBA8, row major, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub opacity: f32,
    pub is_visible: bool,
    #[serde(default)]
    pub mask: Option<MaskDescription>,
    pub pixels: Vec<u8>,
    #[serde(default)]
    pub linked_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskDescription {
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {source}")]
    Decode {
        #[source]
        source: image::ImageError,
    },
    #[error("malformed document description: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },
    #[error("document size {width}x{height} is empty")]
    EmptyCanvas { width: u32, height: u32 },
    #[error("layer {layer_index} has {actual} pixel bytes, expected {expected}")]
    PixelLengthMismatch {
        layer_index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("mask of layer {layer_index} has {actual} pixel bytes, expected {expected}")]
    MaskLengthMismatch {
        layer_index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Decodes an in-memory encoded image to RGBA8.
pub fn decode_bitmap(bytes: &[u8]) -> Result<RgbaImage, ImportError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|source| ImportError::Decode { source })?;
    Ok(decoded.to_rgba8())
}

fn bitmap_from_bytes(
    width: u32,
    height: u32,
    pixels: &[u8],
    mismatch: impl FnOnce(usize, usize) -> ImportError,
) -> Result<RgbaImage, ImportError> {
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(mismatch(expected, pixels.len()));
    }
    RgbaImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| mismatch(expected, pixels.len()))
}

impl DocumentDescription {
    pub fn from_json(text: &str) -> Result<Self, ImportError> {
        serde_json::from_str(text).map_err(|source| ImportError::Json { source })
    }

    /// Parses raw file bytes. Input that is not valid UTF-8 is rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ImportError> {
        serde_json::from_slice(bytes).map_err(|source| ImportError::Json { source })
    }

    pub fn to_json(&self) -> Result<String, ImportError> {
        serde_json::to_string(self).map_err(|source| ImportError::Json { source })
    }
}

impl LayerDescription {
    fn to_member(&self, size: ImageSize, layer_index: usize) -> Result<StructureMember, ImportError> {
        let bitmap = bitmap_from_bytes(self.width, self.height, &self.pixels, |expected, actual| {
            ImportError::PixelLengthMismatch {
                layer_index,
                expected,
                actual,
            }
        })?;
        let image = ChunkyImage::from_bitmap(size, &bitmap, (self.offset_x, self.offset_y));
        let mut member = StructureMember::layer_from_image(image)
            .with_name(self.name.clone())
            .with_opacity(self.opacity)
            .with_visibility(self.is_visible);
        if let Some(mask) = &self.mask {
            let mask_bitmap =
                bitmap_from_bytes(mask.width, mask.height, &mask.pixels, |expected, actual| {
                    ImportError::MaskLengthMismatch {
                        layer_index,
                        expected,
                        actual,
                    }
                })?;
            member = member.with_mask(ChunkyImage::from_bitmap(
                size,
                &mask_bitmap,
                (mask.offset_x, mask.offset_y),
            ));
        }
        if let Some(path) = &self.linked_path {
            member = member.with_linked_path(path.clone());
        }
        Ok(member)
    }
}

fn describe_layers(
    members: &[StructureMember],
    inherited_opacity: f32,
    inherited_visibility: bool,
    out: &mut Vec<LayerDescription>,
) {
    for member in members {
        let opacity = member.opacity() * inherited_opacity;
        let is_visible = member.is_visible() && inherited_visibility;
        match member.kind() {
            MemberKind::Group { children } => {
                if member.mask().is_some() {
                    warn!(
                        "[document] group mask of {} is not representable in a flat description",
                        member.id()
                    );
                }
                describe_layers(children, opacity, is_visible, out);
            }
            MemberKind::Layer { image, linked_path } => {
                let bitmap = image.export_bitmap();
                let mask = member.mask().map(|mask| {
                    let mask_bitmap = mask.export_bitmap();
                    MaskDescription {
                        width: mask_bitmap.width(),
                        height: mask_bitmap.height(),
                        offset_x: 0,
                        offset_y: 0,
                        pixels: mask_bitmap.into_raw(),
                    }
                });
                out.push(LayerDescription {
                    name: member.name().to_owned(),
                    width: bitmap.width(),
                    height: bitmap.height(),
                    offset_x: 0,
                    offset_y: 0,
                    opacity,
                    is_visible,
                    mask,
                    pixels: bitmap.into_raw(),
                    linked_path: linked_path.clone(),
                });
            }
        }
    }
}

impl Document {
    /// Builds a document with one root layer per described layer.
    ///
    /// Every layer is validated before anything is built, so a bad source yields no document.
    pub fn from_description(
        description: &DocumentDescription,
        history_config: HistoryConfig,
    ) -> Result<Document, ImportError> {
        let size = ImageSize::new(description.width, description.height);
        if size.is_empty() {
            return Err(ImportError::EmptyCanvas {
                width: description.width,
                height: description.height,
            });
        }
        let members = description
            .layers
            .iter()
            .enumerate()
            .map(|(layer_index, layer)| layer.to_member(size, layer_index))
            .collect::<Result<Vec<_>, _>>()?;

        let mut document = Document::with_config(size, history_config);
        document.root = members;
        info!(
            "[document] imported {}x{} document with {} layers",
            size.width,
            size.height,
            document.root.len()
        );
        Ok(document)
    }

    /// Flattens the tree into layers, folding group opacity and visibility into each layer.
    pub fn to_description(&self) -> DocumentDescription {
        let mut layers = Vec::new();
        describe_layers(&self.root, 1.0, true, &mut layers);
        DocumentDescription {
            width: self.size.width,
            height: self.size.height,
            layers,
        }
    }
}
