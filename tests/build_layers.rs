use exr_layers::io::SampleSlice;
use exr_layers::layer::codec::LAYERS_STRING_KEY;
use exr_layers::{AbortHandle, Document, Header, MemoryImage, PixelType, ReadDocument, ReadOptions};

fn open_with(channels: &[(&str, PixelType)], options: ReadOptions) -> ReadDocument {
    let mut header = Header::with_size(2, 2);
    for (name, ty) in channels {
        header.insert_channel(*name, *ty);
    }
    let mut img = MemoryImage::new();
    img.add_part(header);
    ReadDocument::open(Box::new(img), options, AbortHandle::never()).unwrap()
}

fn open(channels: &[(&str, PixelType)]) -> ReadDocument {
    open_with(channels, ReadOptions::default())
}

fn layer_names(doc: &Document) -> Vec<String> {
    (0..doc.layers().len())
        .filter_map(|i| doc.layer_name(i))
        .collect()
}

fn member_names(doc: &Document, idx: usize) -> Vec<String> {
    doc.layer(idx)
        .unwrap()
        .channels()
        .iter()
        .map(|id| doc.channels()[id.0].name().to_owned())
        .collect()
}

#[test]
fn render_passes_group_by_prefix() {
    let read = open(&[
        ("R", PixelType::Half),
        ("G", PixelType::Half),
        ("B", PixelType::Half),
        ("A", PixelType::Half),
        ("diffuse.R", PixelType::Half),
        ("diffuse.G", PixelType::Half),
        ("diffuse.B", PixelType::Half),
        ("N.X", PixelType::Float),
        ("N.Y", PixelType::Float),
        ("N.Z", PixelType::Float),
        ("Z", PixelType::Float),
        ("objectId", PixelType::Uint),
    ]);
    let doc = read.document();
    assert!(!doc.used_layers_string());
    assert_eq!(
        layer_names(doc),
        vec!["N", "[Z]", "diffuse", "objectId", "RGBA"]
    );
    assert_eq!(
        member_names(doc, 2),
        vec!["diffuse.R", "diffuse.G", "diffuse.B"]
    );
    let mut normals = member_names(doc, 0);
    normals.sort();
    assert_eq!(normals, vec!["N.X", "N.Y", "N.Z"]);

    let main = doc.find_main_layer(false, false).unwrap();
    assert_eq!(doc.layer_name(main).as_deref(), Some("RGBA"));
    let rgba = doc.layer(main).unwrap();
    let alpha = rgba.alpha_channel(doc.channels()).unwrap();
    assert_eq!(doc.channels()[alpha.0].name(), "A");
}

#[test]
fn wide_layers_overflow_into_numbered_neighbours() {
    let read = open(&[
        ("aov.R", PixelType::Half),
        ("aov.G", PixelType::Half),
        ("aov.B", PixelType::Half),
        ("aov.depth", PixelType::Half),
    ]);
    let doc = read.document();
    assert_eq!(layer_names(doc), vec!["aov2", "aov"]);
    assert_eq!(member_names(doc, 0), vec!["aov.depth"]);
    assert_eq!(member_names(doc, 1), vec!["aov.R", "aov.G", "aov.B"]);
}

#[test]
fn every_channel_lands_in_exactly_one_layer() {
    let read = open(&[
        ("R", PixelType::Half),
        ("Y", PixelType::Half),
        ("AR", PixelType::Half),
        ("specular.R", PixelType::Half),
        ("specular.A", PixelType::Half),
        ("mask", PixelType::Float),
        ("id", PixelType::Uint),
        ("id2", PixelType::Uint),
    ]);
    let doc = read.document();
    let mut seen: Vec<usize> = doc
        .layers()
        .iter()
        .flat_map(|l| l.channels().iter().map(|id| id.0))
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..doc.channels().len()).collect::<Vec<_>>());
}

#[test]
fn malformed_layer_string_falls_back_to_grouping() {
    let mut header = Header::with_size(1, 1)
        .with_channel("R", PixelType::Half)
        .with_channel("G", PixelType::Half)
        .with_channel("B", PixelType::Half);
    header.set_string_attribute(LAYERS_STRING_KEY, "broken{\"");
    let mut img = MemoryImage::new();
    let p = img.add_part(header);
    img.set_samples(p, "G", SampleSlice::Float(&[0.5])).unwrap();

    let read = ReadDocument::open(Box::new(img), ReadOptions::default(), AbortHandle::never())
        .unwrap();
    let doc = read.document();
    assert!(!doc.used_layers_string());
    assert_eq!(layer_names(doc), vec!["RGB"]);
}

#[test]
fn layer_string_naming_unknown_channels_is_ignored() {
    let mut header = Header::with_size(1, 1).with_channel("R", PixelType::Half);
    header.set_string_attribute(
        LAYERS_STRING_KEY,
        "ghost[visible:true, mode:Normal]{r:missing.R}",
    );
    let mut img = MemoryImage::new();
    img.add_part(header);

    let read = ReadDocument::open(Box::new(img), ReadOptions::default(), AbortHandle::never())
        .unwrap();
    assert!(!read.document().used_layers_string());
    assert_eq!(layer_names(read.document()), vec!["[R]"]);
}

#[test]
fn split_alpha_ignores_the_layer_string() {
    let mut header = Header::with_size(1, 1)
        .with_channel("R", PixelType::Half)
        .with_channel("A", PixelType::Half);
    header.set_string_attribute(
        LAYERS_STRING_KEY,
        "paint[visible:true, mode:Normal]{r:R, a:A}",
    );
    let mut img = MemoryImage::new();
    img.add_part(header);
    let options = ReadOptions {
        split_alpha: true,
        ..ReadOptions::default()
    };

    let read = ReadDocument::open(Box::new(img), options, AbortHandle::never()).unwrap();
    let doc = read.document();
    assert!(!doc.used_layers_string());
    assert_eq!(doc.layers().len(), 2);
    assert!(layer_names(doc).iter().all(|n| n != "paint"));
}
