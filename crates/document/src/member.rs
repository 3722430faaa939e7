use std::fmt;
use std::path::{Path, PathBuf};

use chunky::ChunkyImage;
use model::ImageSize;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MEMBER_NAME: &str = "Unnamed";

/// Stable identity of a layer or group. Never reused, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberKind {
    Layer {
        image: ChunkyImage,
        /// File this layer mirrors, if it is a linked reference layer.
        linked_path: Option<PathBuf>,
    },
    Group {
        children: Vec<StructureMember>,
    },
}

/// A layer or group in the document tree.
///
/// `Clone` keeps the identity of every member in the subtree; [`StructureMember::duplicate`]
/// assigns fresh ones.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureMember {
    id: MemberId,
    name: String,
    opacity: f32,
    is_visible: bool,
    mask: Option<ChunkyImage>,
    kind: MemberKind,
}

fn clamp_opacity(opacity: f32) -> f32 {
    if opacity.is_nan() {
        return 0.0;
    }
    opacity.clamp(0.0, 1.0)
}

impl StructureMember {
    fn with_kind(kind: MemberKind) -> Self {
        Self {
            id: MemberId::new(),
            name: DEFAULT_MEMBER_NAME.to_owned(),
            opacity: 1.0,
            is_visible: true,
            mask: None,
            kind,
        }
    }

    pub fn new_layer(size: ImageSize) -> Self {
        Self::layer_from_image(ChunkyImage::new(size))
    }

    pub fn layer_from_image(image: ChunkyImage) -> Self {
        Self::with_kind(MemberKind::Layer {
            image,
            linked_path: None,
        })
    }

    pub fn new_group(children: Vec<StructureMember>) -> Self {
        Self::with_kind(MemberKind::Group { children })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = clamp_opacity(opacity);
        self
    }

    pub fn with_visibility(mut self, is_visible: bool) -> Self {
        self.is_visible = is_visible;
        self
    }

    pub fn with_mask(mut self, mask: ChunkyImage) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_linked_path(mut self, path: impl Into<PathBuf>) -> Self {
        if let MemberKind::Layer { linked_path, .. } = &mut self.kind {
            *linked_path = Some(path.into());
        }
        self
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Clamped to `[0, 1]`; NaN becomes 0.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = clamp_opacity(opacity);
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub fn set_visible(&mut self, is_visible: bool) {
        self.is_visible = is_visible;
    }

    pub fn mask(&self) -> Option<&ChunkyImage> {
        self.mask.as_ref()
    }

    pub fn mask_mut(&mut self) -> Option<&mut ChunkyImage> {
        self.mask.as_mut()
    }

    pub fn set_mask(&mut self, mask: Option<ChunkyImage>) -> Option<ChunkyImage> {
        std::mem::replace(&mut self.mask, mask)
    }

    pub fn kind(&self) -> &MemberKind {
        &self.kind
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, MemberKind::Group { .. })
    }

    pub fn image(&self) -> Option<&ChunkyImage> {
        match &self.kind {
            MemberKind::Layer { image, .. } => Some(image),
            MemberKind::Group { .. } => None,
        }
    }

    pub fn image_mut(&mut self) -> Option<&mut ChunkyImage> {
        match &mut self.kind {
            MemberKind::Layer { image, .. } => Some(image),
            MemberKind::Group { .. } => None,
        }
    }

    pub fn linked_path(&self) -> Option<&Path> {
        match &self.kind {
            MemberKind::Layer { linked_path, .. } => linked_path.as_deref(),
            MemberKind::Group { .. } => None,
        }
    }

    pub(crate) fn set_linked_path(&mut self, path: Option<PathBuf>) -> bool {
        match &mut self.kind {
            MemberKind::Layer { linked_path, .. } => {
                *linked_path = path;
                true
            }
            MemberKind::Group { .. } => false,
        }
    }

    /// Empty for layers.
    pub fn children(&self) -> &[StructureMember] {
        match &self.kind {
            MemberKind::Group { children } => children,
            MemberKind::Layer { .. } => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<StructureMember>> {
        match &mut self.kind {
            MemberKind::Group { children } => Some(children),
            MemberKind::Layer { .. } => None,
        }
    }

    /// Deep copy with a fresh identity for this member and every descendant.
    pub fn duplicate(&self) -> StructureMember {
        let kind = match &self.kind {
            MemberKind::Layer { image, linked_path } => MemberKind::Layer {
                image: image.clone(),
                linked_path: linked_path.clone(),
            },
            MemberKind::Group { children } => MemberKind::Group {
                children: children.iter().map(StructureMember::duplicate).collect(),
            },
        };
        StructureMember {
            id: MemberId::new(),
            name: self.name.clone(),
            opacity: self.opacity,
            is_visible: self.is_visible,
            mask: self.mask.clone(),
            kind,
        }
    }

    /// Ids of this member and all descendants, depth first.
    pub fn subtree_ids(&self) -> Vec<MemberId> {
        let mut ids = vec![self.id];
        for child in self.children() {
            ids.extend(child.subtree_ids());
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunky::test_helpers::image_with_filled_chunks;
    use image::Rgba;
    use model::ChunkPos;

    fn masked_layer() -> StructureMember {
        let size = ImageSize::new(256, 256);
        StructureMember::layer_from_image(image_with_filled_chunks(
            size,
            &[ChunkPos::new(0, 0)],
            Rgba([1, 2, 3, 255]),
        ))
        .with_mask(image_with_filled_chunks(
            size,
            &[ChunkPos::new(0, 0)],
            Rgba([0, 0, 0, 255]),
        ))
    }

    #[test]
    fn new_member_has_documented_defaults() {
        let layer = StructureMember::new_layer(ImageSize::new(10, 10));
        assert_eq!(layer.name(), "Unnamed");
        assert_eq!(layer.opacity(), 1.0);
        assert!(layer.is_visible());
        assert!(layer.mask().is_none());
        assert!(layer.linked_path().is_none());
        assert_ne!(
            layer.id(),
            StructureMember::new_layer(ImageSize::new(10, 10)).id()
        );
    }

    #[test]
    fn opacity_is_clamped() {
        let mut layer = StructureMember::new_layer(ImageSize::new(1, 1));
        layer.set_opacity(1.5);
        assert_eq!(layer.opacity(), 1.0);
        layer.set_opacity(-0.5);
        assert_eq!(layer.opacity(), 0.0);
        layer.set_opacity(f32::NAN);
        assert_eq!(layer.opacity(), 0.0);
    }

    #[test]
    fn clone_keeps_identity_and_is_independent() {
        let original = StructureMember::new_group(vec![masked_layer()])
            .with_name("group")
            .with_opacity(0.5);
        let mut copy = original.clone();
        assert_eq!(copy, original);
        assert_eq!(copy.subtree_ids(), original.subtree_ids());

        copy.set_name("renamed");
        copy.children_mut().expect("group")[0].set_mask(None);
        assert_eq!(original.name(), "group");
        assert!(original.children()[0].mask().is_some());
    }

    #[test]
    fn duplicate_assigns_fresh_ids_to_every_descendant() {
        let original = StructureMember::new_group(vec![
            masked_layer(),
            StructureMember::new_group(vec![masked_layer()]),
        ]);
        let copy = original.duplicate();
        let original_ids = original.subtree_ids();
        let copy_ids = copy.subtree_ids();
        assert_eq!(copy_ids.len(), original_ids.len());
        assert!(copy_ids.iter().all(|id| !original_ids.contains(id)));
        assert_eq!(copy.children()[0].image(), original.children()[0].image());
        assert_eq!(copy.children()[0].mask(), original.children()[0].mask());
    }
}
