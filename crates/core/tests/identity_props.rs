use proptest::prelude::*;
use remedy_core::{
    content_id, extract_elements, normalize_content, Element, ElementKind, ExtractOptions,
    SourceRef,
};

proptest! {
    #[test]
    fn id_is_stable_for_fixed_content(content in "[A-Za-z0-9 <>=\"/.-]{0,80}") {
        let first = content_id(&content);
        let second = content_id(&content);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, content_id(&normalize_content(&content)));
    }

    #[test]
    fn equal_normalized_content_collides(
        words in prop::collection::vec("[a-z]{1,8}", 1..6),
        pad in "[ \t]{0,3}",
        line_a in 1usize..500,
        line_b in 1usize..500,
    ) {
        let tight = words.join(" ");
        let loose = format!("{pad}{}{pad}", words.join("  ").to_uppercase());
        let a = Element::new(ElementKind::Line, tight, SourceRef {
            source_path: "a.html".to_string(),
            start_line: line_a,
            end_line: line_a,
        });
        let b = Element::new(ElementKind::Line, loose, SourceRef {
            source_path: "b.html".to_string(),
            start_line: line_b,
            end_line: line_b,
        });
        prop_assert_eq!(a.normalized_content, b.normalized_content);
        prop_assert_eq!(a.id, b.id);
    }

    #[test]
    fn normalization_is_idempotent(content in "[A-Za-z0-9 \t\n<>/=\"ＡＢＣé]{0,60}") {
        let once = normalize_content(&content);
        prop_assert_eq!(normalize_content(&once), once);
    }

    #[test]
    fn extraction_is_repeatable(lines in prop::collection::vec("[a-z <>=\"]{0,40}", 0..20)) {
        let text = lines.join("\n");
        let first = extract_elements(&text, "page.html", &ExtractOptions::default());
        let second = extract_elements(&text, "page.html", &ExtractOptions::default());
        prop_assert_eq!(first, second);
    }
}
