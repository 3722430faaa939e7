use std::io::Cursor;

use chunky::{ApplyMaskOperation, RectangleFillOperation};
use image::{Rgba, RgbaImage};
use model::{ChunkPos, PixelRect};

use super::*;

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

fn solid_layer(size: ImageSize, color: Rgba<u8>) -> StructureMember {
    let bitmap = RgbaImage::from_pixel(size.width, size.height, color);
    StructureMember::layer_from_image(ChunkyImage::from_bitmap(size, &bitmap, (0, 0)))
}

fn left_half_mask(size: ImageSize) -> ChunkyImage {
    let bitmap = RgbaImage::from_fn(size.width, size.height, |x, _| {
        if x < size.width / 2 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    ChunkyImage::from_bitmap(size, &bitmap, (0, 0))
}

fn fill_layer(document: &mut Document, member_id: MemberId, rect: PixelRect) -> CommitSummary {
    let mut fill = RectangleFillOperation::new(rect, RED, document.ledger());
    let session = document
        .begin_image_edit(member_id, ImageTarget::Content)
        .expect("begin image edit");
    document
        .apply_to_image(member_id, session, &mut fill)
        .expect("apply fill");
    document
        .commit_image_edit(member_id, session)
        .expect("commit image edit")
}

fn layer_chunks(document: &Document, member_id: MemberId) -> usize {
    document
        .member(member_id)
        .and_then(StructureMember::image)
        .expect("layer exists")
        .find_committed_chunks()
        .len()
}

#[test]
fn new_document_is_empty() {
    let document = Document::new(64, 32);
    assert_eq!(document.size(), ImageSize::new(64, 32));
    assert!(document.root().is_empty());
    assert!(!document.can_undo());
    assert_eq!(document.history_config(), HistoryConfig::default());
}

#[test]
fn add_member_rejects_bad_placement() {
    let mut document = Document::new(16, 16);
    let layer = StructureMember::new_layer(document.size());
    assert_eq!(
        document.add_member(None, 5, layer.clone()),
        Err(DocumentError::IndexOutOfRange {
            parent_id: None,
            index: 5,
            len: 0
        })
    );
    let layer_id = document
        .add_member(None, 0, layer.clone())
        .expect("add layer");
    assert_eq!(
        document.add_member(None, 1, layer),
        Err(DocumentError::DuplicateMemberId {
            member_id: layer_id
        })
    );
    assert_eq!(
        document.add_member(Some(layer_id), 0, StructureMember::new_layer(document.size())),
        Err(DocumentError::ParentIsNotGroup {
            parent_id: layer_id
        })
    );
    let wrong_size = StructureMember::new_layer(ImageSize::new(8, 8));
    assert!(matches!(
        document.add_member(None, 1, wrong_size),
        Err(DocumentError::SizeMismatch { .. })
    ));
}

#[test]
fn move_member_rejects_cycles() {
    let mut document = Document::new(16, 16);
    let inner = StructureMember::new_group(Vec::new());
    let inner_id = inner.id();
    let outer = StructureMember::new_group(vec![inner]);
    let outer_id = document.add_member(None, 0, outer).expect("add outer");

    assert_eq!(
        document.move_member(outer_id, Some(inner_id), 0),
        Err(DocumentError::CycleDetected {
            member_id: outer_id,
            parent_id: inner_id
        })
    );
    assert_eq!(
        document.move_member(outer_id, Some(outer_id), 0),
        Err(DocumentError::CycleDetected {
            member_id: outer_id,
            parent_id: outer_id
        })
    );
    assert_eq!(document.parent_of(inner_id), Some(Some(outer_id)));
    assert_eq!(document.ancestors_of(inner_id), Some(vec![outer_id]));
}

#[test]
fn failed_move_keeps_member_in_place() {
    let mut document = Document::new(16, 16);
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(document.size()))
        .expect("add layer");
    let group_id = document
        .add_member(None, 1, StructureMember::new_group(Vec::new()))
        .expect("add group");
    assert!(matches!(
        document.move_member(layer_id, Some(group_id), 3),
        Err(DocumentError::IndexOutOfRange { .. })
    ));
    assert_eq!(
        document.location_of(layer_id),
        Some(MemberLocation {
            parent: None,
            index: 0
        })
    );
}

#[test]
fn structural_edits_undo_and_redo() {
    let mut document = Document::new(16, 16);
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(document.size()))
        .expect("add layer");
    let group_id = document
        .add_member(None, 1, StructureMember::new_group(Vec::new()))
        .expect("add group");
    document
        .move_member(layer_id, Some(group_id), 0)
        .expect("move layer into group");
    document.rename(layer_id, "sky").expect("rename");
    document.set_opacity(layer_id, 2.0).expect("set opacity");

    let layer = document.member(layer_id).expect("layer");
    assert_eq!(layer.name(), "sky");
    assert_eq!(layer.opacity(), 1.0);
    assert_eq!(document.parent_of(layer_id), Some(Some(group_id)));

    assert_eq!(document.undo(), Ok(true));
    assert_eq!(document.undo(), Ok(true));
    assert_eq!(
        document.member(layer_id).expect("layer").name(),
        DEFAULT_MEMBER_NAME
    );
    assert_eq!(document.undo(), Ok(true));
    assert_eq!(document.parent_of(layer_id), Some(None));
    assert_eq!(document.root().len(), 2);

    assert_eq!(document.redo(), Ok(true));
    assert_eq!(document.parent_of(layer_id), Some(Some(group_id)));
    assert_eq!(document.root().len(), 1);
}

#[test]
fn remove_and_visibility_round_trip_through_history() {
    let mut document = Document::new(16, 16);
    let layer_id = document
        .add_member(None, 0, solid_layer(document.size(), RED))
        .expect("add layer");
    document.set_visibility(layer_id, false).expect("hide");
    let removed = document.remove_member(layer_id).expect("remove");
    assert!(!removed.is_visible());
    assert!(!document.contains(layer_id));

    assert_eq!(document.undo(), Ok(true));
    let restored = document.member(layer_id).expect("layer restored");
    assert_eq!(restored, &removed);
    assert_eq!(document.undo(), Ok(true));
    assert!(document.member(layer_id).expect("layer").is_visible());
}

#[test]
fn duplicate_member_places_fresh_copy_above() {
    let mut document = Document::new(16, 16);
    let group = StructureMember::new_group(vec![solid_layer(ImageSize::new(16, 16), RED)]);
    let child_id = group.children()[0].id();
    let group_id = document.add_member(None, 0, group).expect("add group");

    let copy_id = document.duplicate_member(group_id).expect("duplicate");
    assert_ne!(copy_id, group_id);
    assert_eq!(
        document.location_of(copy_id),
        Some(MemberLocation {
            parent: None,
            index: 1
        })
    );
    let copy = document.member(copy_id).expect("copy");
    assert_ne!(copy.children()[0].id(), child_id);
    assert_eq!(
        copy.children()[0].image(),
        document.member(child_id).and_then(StructureMember::image)
    );

    assert_eq!(document.undo(), Ok(true));
    assert!(!document.contains(copy_id));
}

#[test]
fn pixel_edit_undo_and_redo_never_double_apply() {
    let mut document = Document::new(512, 256);
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(document.size()))
        .expect("add layer");
    let summary = fill_layer(&mut document, layer_id, PixelRect::new(10, 10, 5, 5));
    assert_eq!(summary.dirty_chunks, vec![ChunkPos::new(0, 0)]);
    assert_eq!(layer_chunks(&document, layer_id), 1);

    assert_eq!(document.undo(), Ok(true));
    assert_eq!(layer_chunks(&document, layer_id), 0);
    assert_eq!(document.undo(), Ok(true));
    assert!(!document.contains(layer_id));
    assert_eq!(document.undo(), Ok(false));

    assert_eq!(document.redo(), Ok(true));
    assert_eq!(layer_chunks(&document, layer_id), 0);
    assert_eq!(document.redo(), Ok(true));
    assert_eq!(layer_chunks(&document, layer_id), 1);
    assert_eq!(document.redo(), Ok(false));
    assert!(document.ledger().is_drained());
}

#[test]
fn chunk_delta_covers_only_visited_chunks() {
    let mut document = Document::new(512, 512);
    let layer_id = document
        .add_member(None, 0, solid_layer(ImageSize::new(512, 512), BLUE))
        .expect("add layer");
    fill_layer(&mut document, layer_id, PixelRect::new(300, 300, 4, 4));
    let image = document
        .member(layer_id)
        .and_then(StructureMember::image)
        .expect("layer image");
    let untouched = image
        .get_chunk(ChunkPos::new(0, 0), model::ChunkResolution::Full)
        .expect("chunk (0, 0)");

    assert_eq!(document.undo(), Ok(true));
    let image = document
        .member(layer_id)
        .and_then(StructureMember::image)
        .expect("layer image");
    let after_undo = image
        .get_chunk(ChunkPos::new(0, 0), model::ChunkResolution::Full)
        .expect("chunk (0, 0)");
    assert!(after_undo.shares_surface_with(&untouched));
    assert_eq!(image.export_bitmap(), RgbaImage::from_pixel(512, 512, BLUE));
}

#[test]
fn cancelled_edit_records_nothing() {
    let mut document = Document::new(64, 64);
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(document.size()))
        .expect("add layer");
    let mut fill = RectangleFillOperation::new(PixelRect::new(0, 0, 8, 8), RED, document.ledger());
    let session = document
        .begin_image_edit(layer_id, ImageTarget::Content)
        .expect("begin");
    document
        .apply_to_image(layer_id, session, &mut fill)
        .expect("apply");
    document.cancel_image_edit(layer_id, session).expect("cancel");

    assert_eq!(layer_chunks(&document, layer_id), 0);
    assert_eq!(document.undo(), Ok(true));
    assert_eq!(document.undo(), Ok(false));
}

#[test]
fn new_edit_clears_redo() {
    let mut document = Document::new(64, 64);
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(document.size()))
        .expect("add layer");
    document.rename(layer_id, "first").expect("rename");
    assert_eq!(document.undo(), Ok(true));
    assert!(document.can_redo());
    document.rename(layer_id, "second").expect("rename");
    assert!(!document.can_redo());
    assert_eq!(document.redo(), Ok(false));
}

#[test]
fn history_is_bounded_by_config() {
    let mut document =
        Document::with_config(ImageSize::new(8, 8), HistoryConfig { max_entries: 2 });
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(ImageSize::new(8, 8)))
        .expect("add layer");
    document.rename(layer_id, "a").expect("rename");
    document.rename(layer_id, "b").expect("rename");
    assert_eq!(document.undo(), Ok(true));
    assert_eq!(document.undo(), Ok(true));
    assert_eq!(document.undo(), Ok(false));
    assert!(document.contains(layer_id));
}

#[test]
fn open_image_edit_blocks_structure_and_history() {
    let mut document = Document::new(64, 64);
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(document.size()))
        .expect("add layer");
    let session = document
        .begin_image_edit(layer_id, ImageTarget::Content)
        .expect("begin");
    let blocked = Err(DocumentError::ImageEditActive {
        active_member_id: layer_id,
        active_session_id: session,
    });
    assert_eq!(document.rename(layer_id, "x"), blocked);
    assert_eq!(document.undo().map(|_| ()), blocked);
    assert_eq!(
        document.begin_image_edit(layer_id, ImageTarget::Content).map(|_| ()),
        blocked
    );
    assert_eq!(
        document.commit_image_edit(layer_id, EditSessionId(999)).map(|_| ()),
        Err(DocumentError::ImageEditMismatch {
            expected_member_id: layer_id,
            expected_session_id: session,
            actual_member_id: layer_id,
            actual_session_id: EditSessionId(999),
        })
    );
    document.cancel_image_edit(layer_id, session).expect("cancel");
    assert_eq!(
        document.cancel_image_edit(layer_id, session),
        Err(DocumentError::MissingImageEdit {
            member_id: layer_id,
            session_id: session
        })
    );
}

#[test]
fn mask_edits_target_the_mask_image() {
    let mut document = Document::new(256, 256);
    let group_id = document
        .add_member(None, 0, StructureMember::new_group(Vec::new()))
        .expect("add group");
    assert_eq!(
        document.begin_image_edit(group_id, ImageTarget::Content),
        Err(DocumentError::MemberIsNotLayer {
            member_id: group_id
        })
    );
    assert_eq!(
        document.begin_image_edit(group_id, ImageTarget::Mask),
        Err(DocumentError::MissingMask {
            member_id: group_id
        })
    );

    document
        .set_mask(group_id, Some(ChunkyImage::new(document.size())))
        .expect("set mask");
    let mut fill = RectangleFillOperation::new(PixelRect::new(0, 0, 8, 8), RED, document.ledger());
    document
        .draw(group_id, ImageTarget::Mask, &mut fill)
        .expect("draw on mask");
    let mask = document
        .member(group_id)
        .and_then(StructureMember::mask)
        .expect("mask");
    assert_eq!(mask.find_committed_chunks().len(), 1);

    assert_eq!(document.undo(), Ok(true));
    let mask = document
        .member(group_id)
        .and_then(StructureMember::mask)
        .expect("mask");
    assert!(mask.find_committed_chunks().is_empty());
}

#[test]
fn apply_mask_operation_runs_through_document() {
    let size = ImageSize::new(256, 256);
    let mut document = Document::new(256, 256);
    let layer = solid_layer(size, RED).with_mask(left_half_mask(size));
    let layer_id = document.add_member(None, 0, layer).expect("add layer");
    let mask = document
        .member(layer_id)
        .and_then(StructureMember::mask)
        .cloned()
        .expect("mask");
    let mut apply = ApplyMaskOperation::new(&mask, document.ledger());
    document
        .draw(layer_id, ImageTarget::Content, &mut apply)
        .expect("apply mask");
    drop(apply);
    let bitmap = document
        .member(layer_id)
        .and_then(StructureMember::image)
        .expect("image")
        .export_bitmap();
    assert_eq!(bitmap.get_pixel(10, 10)[3], 255);
    assert_eq!(bitmap.get_pixel(200, 10)[3], 0);
    assert!(document.ledger().is_drained());
}

#[test]
fn flatten_composites_opacity_masks_and_hidden_layers() {
    let size = ImageSize::new(8, 8);
    let mut document = Document::new(8, 8);
    document
        .add_member(None, 0, solid_layer(size, RED))
        .expect("add red");
    document
        .add_member(None, 1, solid_layer(size, BLUE).with_opacity(0.5))
        .expect("add blue");
    document
        .add_member(
            None,
            2,
            solid_layer(size, Rgba([0, 255, 0, 255])).with_visibility(false),
        )
        .expect("add hidden green");

    let flat = document.flatten();
    assert_eq!(*flat.get_pixel(3, 3), Rgba([128, 0, 128, 255]));

    let mut masked = Document::new(8, 8);
    masked
        .add_member(None, 0, solid_layer(size, RED).with_mask(left_half_mask(size)))
        .expect("add masked");
    let flat = masked.flatten();
    assert_eq!(*flat.get_pixel(1, 1), RED);
    assert_eq!(flat.get_pixel(6, 1)[3], 0);
    assert!(document.ledger().is_drained());
}

#[test]
fn flatten_blends_groups_in_isolation() {
    let size = ImageSize::new(4, 4);
    let mut document = Document::new(4, 4);
    let group =
        StructureMember::new_group(vec![solid_layer(size, RED), solid_layer(size, BLUE)])
            .with_opacity(0.5);
    document.add_member(None, 0, group).expect("add group");
    assert_eq!(*document.flatten().get_pixel(0, 0), Rgba([0, 0, 255, 128]));
}

#[test]
fn preview_fits_longest_edge() {
    let mut document = Document::new(400, 100);
    document
        .add_member(None, 0, solid_layer(ImageSize::new(400, 100), RED))
        .expect("add layer");
    let preview = document.preview(40);
    assert_eq!(preview.dimensions(), (40, 10));
    assert_eq!(*preview.get_pixel(20, 5), RED);
    assert_eq!(document.preview(1000).dimensions(), (400, 100));
}

fn sample_description() -> DocumentDescription {
    let (width, height) = (20u32, 10u32);
    let pixels = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 9, 255]));
    let mask = RgbaImage::from_fn(width, height, |x, _| Rgba([255, 255, 255, (x * 12) as u8]));
    DocumentDescription {
        width,
        height,
        layers: vec![
            LayerDescription {
                name: "background".to_owned(),
                width,
                height,
                offset_x: 0,
                offset_y: 0,
                opacity: 1.0,
                is_visible: true,
                mask: None,
                pixels: pixels.clone().into_raw(),
                linked_path: None,
            },
            LayerDescription {
                name: "detail".to_owned(),
                width,
                height,
                offset_x: 0,
                offset_y: 0,
                opacity: 0.5,
                is_visible: false,
                mask: Some(MaskDescription {
                    width,
                    height,
                    offset_x: 0,
                    offset_y: 0,
                    pixels: mask.into_raw(),
                }),
                pixels: pixels.into_raw(),
                linked_path: Some("reference.png".into()),
            },
        ],
    }
}

#[test]
fn description_round_trips_through_document() {
    let description = sample_description();
    let document =
        Document::from_description(&description, HistoryConfig::default()).expect("import");
    assert_eq!(document.root().len(), 2);
    assert_eq!(document.root()[1].name(), "detail");
    assert!(!document.root()[1].is_visible());
    assert_eq!(
        document.root()[1].linked_path(),
        Some(std::path::Path::new("reference.png"))
    );
    assert_eq!(document.to_description(), description);
}

#[test]
fn description_round_trips_through_json() {
    let description = sample_description();
    let json = description.to_json().expect("serialize");
    assert_eq!(DocumentDescription::from_json(&json).expect("parse"), description);
    assert!(matches!(
        DocumentDescription::from_json("{\"width\": 1"),
        Err(ImportError::Json { .. })
    ));
}

#[test]
fn unusable_description_is_rejected() {
    let mut description = sample_description();
    description.layers[1].pixels.truncate(4);
    assert!(matches!(
        Document::from_description(&description, HistoryConfig::default()),
        Err(ImportError::PixelLengthMismatch {
            layer_index: 1,
            expected: 800,
            actual: 4
        })
    ));

    let mut description = sample_description();
    description.width = 0;
    assert!(matches!(
        Document::from_description(&description, HistoryConfig::default()),
        Err(ImportError::EmptyCanvas { .. })
    ));
}

#[test]
fn decode_bitmap_reads_png_and_rejects_garbage() {
    let source = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(source.clone())
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode png");
    assert_eq!(decode_bitmap(bytes.get_ref()).expect("decode png"), source);
    assert!(matches!(
        decode_bitmap(b"not an image"),
        Err(ImportError::Decode { .. })
    ));
}

#[test]
fn linked_layer_reload_and_clear() {
    let size = ImageSize::new(16, 16);
    let mut document = Document::new(16, 16);
    let layer_id = document
        .add_member(
            None,
            0,
            StructureMember::new_layer(size).with_linked_path("ref.png"),
        )
        .expect("add linked layer");
    document
        .replace_layer_content(layer_id, &RgbaImage::from_pixel(16, 16, RED), (0, 0))
        .expect("reload");
    assert_eq!(layer_chunks(&document, layer_id), 1);

    document
        .unlink_and_clear_layer(layer_id)
        .expect("clear layer");
    let layer = document.member(layer_id).expect("layer kept");
    assert!(layer.linked_path().is_none());
    assert_eq!(layer_chunks(&document, layer_id), 0);
}

#[test]
fn reload_keeps_unrelated_history_and_drops_stale_deltas() {
    let size = ImageSize::new(16, 16);
    let mut document = Document::new(16, 16);
    let other_id = document
        .add_member(None, 0, StructureMember::new_layer(size))
        .expect("add layer");
    let linked_id = document
        .add_member(
            None,
            1,
            StructureMember::new_layer(size).with_linked_path("ref.png"),
        )
        .expect("add linked layer");
    fill_layer(&mut document, other_id, PixelRect::new(0, 0, 4, 4));
    fill_layer(&mut document, linked_id, PixelRect::new(0, 0, 4, 4));
    fill_layer(&mut document, other_id, PixelRect::new(8, 8, 4, 4));
    assert!(document.undo().expect("undo"));

    let revision = document.revision();
    document
        .reload_layer_content(linked_id, &RgbaImage::from_pixel(16, 16, BLUE), (0, 0))
        .expect("reload");
    assert!(document.revision() > revision);
    assert!(document.can_redo());

    let pixel_of = |document: &Document, id: MemberId, x: u32, y: u32| {
        *document
            .member(id)
            .and_then(StructureMember::image)
            .expect("layer exists")
            .export_bitmap()
            .get_pixel(x, y)
    };
    assert!(document.redo().expect("redo"));
    assert_eq!(pixel_of(&document, other_id, 9, 9), RED);

    // Remaining undo entries: the second fill, the first fill, adding the other layer.
    for _ in 0..3 {
        assert!(document.undo().expect("undo"));
    }
    assert!(!document.undo().expect("undo"));
    assert!(document.member(other_id).is_none());
    assert_eq!(pixel_of(&document, linked_id, 0, 0), BLUE);
}

#[test]
fn reload_is_rejected_during_an_image_edit() {
    let size = ImageSize::new(16, 16);
    let mut document = Document::new(16, 16);
    let layer_id = document
        .add_member(None, 0, StructureMember::new_layer(size))
        .expect("add layer");
    document
        .begin_image_edit(layer_id, ImageTarget::Content)
        .expect("begin image edit");
    assert!(matches!(
        document.reload_layer_content(layer_id, &RgbaImage::from_pixel(16, 16, BLUE), (0, 0)),
        Err(DocumentError::ImageEditActive { .. })
    ));
}
