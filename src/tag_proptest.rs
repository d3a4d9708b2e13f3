//! Property-based tests for branch/tag naming and recipe parsing.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::image::{branch_to_tag, date_tag, resolve_build_tag, ImageSource};
    use crate::recipe::Recipe;
    use proptest::prelude::*;

    // ============================================================================
    // branch_to_tag property tests
    // ============================================================================

    proptest! {
        /// Property: branch_to_tag is deterministic (same input = same output)
        #[test]
        fn branch_to_tag_is_deterministic(branch in "[a-zA-Z0-9._/-]{1,40}") {
            prop_assert_eq!(branch_to_tag(&branch), branch_to_tag(&branch));
        }

        /// Property: only the three special branches are remapped, every
        /// other branch maps to itself verbatim
        #[test]
        fn branch_to_tag_passes_through_ordinary_branches(branch in "[a-zA-Z0-9._-]{1,40}") {
            prop_assume!(branch != "master" && branch != "main" && branch != "dev");
            prop_assert_eq!(branch_to_tag(&branch), branch);
        }

        /// Property: the output is never empty for a non-empty branch
        #[test]
        fn branch_to_tag_never_empty(branch in "[a-zA-Z0-9._/-]{1,40}") {
            prop_assert!(!branch_to_tag(&branch).is_empty());
        }
    }

    // ============================================================================
    // date_tag property tests
    // ============================================================================

    proptest! {
        /// Property: the stamped tag always ends in a 6-digit stamp
        #[test]
        fn date_tag_ends_in_six_digits(tag in "[a-zA-Z0-9._-]{0,40}") {
            let stamped = date_tag(&tag);
            let suffix = &stamped[stamped.len() - 6..];
            prop_assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        }

        /// Property: an ordinary tag is preserved as the prefix of its
        /// stamped form, separated by an underscore
        #[test]
        fn date_tag_preserves_ordinary_tags(tag in "[a-z0-9.-]{1,40}") {
            prop_assume!(tag != "latest");
            let stamped = date_tag(&tag);
            let prefix = format!("{}_", tag);
            prop_assert!(stamped.starts_with(&prefix));
        }
    }

    // ============================================================================
    // resolve_build_tag property tests
    // ============================================================================

    proptest! {
        /// Property: an explicit non-empty tag always wins over the branch
        #[test]
        fn explicit_tag_wins(tag in "[a-z0-9._-]{1,20}", branch in "[a-z0-9._-]{1,20}") {
            prop_assert_eq!(resolve_build_tag(Some(&tag), &branch), tag);
        }

        /// Property: without an explicit tag the result matches the
        /// branch-derived tag
        #[test]
        fn derived_tag_matches_branch_mapping(branch in "[a-z0-9._-]{1,20}") {
            prop_assert_eq!(resolve_build_tag(None, &branch), branch_to_tag(&branch));
        }
    }

    // ============================================================================
    // ImageSource property tests
    // ============================================================================

    proptest! {
        /// Property: a trailing .git never changes a source's identity
        #[test]
        fn git_suffix_is_normalized(owner in "[a-z0-9-]{1,20}", repo in "[a-z0-9-]{1,20}") {
            let url = format!("https://github.com/{}/{}", owner, repo);
            let with_suffix = format!("{}.git", url);
            prop_assert_eq!(
                ImageSource::new(&url, "dev"),
                ImageSource::new(&with_suffix, "dev")
            );
        }

        /// Property: the display form always carries the branch in angle
        /// brackets
        #[test]
        fn display_carries_branch(repo in "[a-z0-9-]{1,20}", branch in "[a-z0-9._-]{1,20}") {
            let url = format!("https://github.com/owner/{}", repo);
            let display = ImageSource::new(&url, &branch).to_string();
            let suffix = format!("<{}>", branch);
            prop_assert!(display.ends_with(&suffix));
        }
    }

    // ============================================================================
    // Recipe property tests
    // ============================================================================

    proptest! {
        /// Property: parsing a well-formed recipe never fails and
        /// preserves the declared fields
        #[test]
        fn well_formed_recipe_parses(
            name in "[a-z0-9-]{1,20}/[a-z0-9-]{1,20}",
            base in "[a-z0-9-]{1,20}/[a-z0-9-]{1,20}",
            tag in "[a-z0-9._-]{1,20}",
        ) {
            let content = format!("# NAME: {}\nFROM {}:{}\n", name, base, tag);
            let recipe = Recipe::parse(&content, "prop").unwrap();
            prop_assert_eq!(&recipe.name, &name);
            prop_assert_eq!(&recipe.base_image, &format!("{}:{}", base, tag));
            prop_assert!(recipe.is_root());
        }

        /// Property: a tagless FROM reference always comes out tagged
        #[test]
        fn parsed_base_image_always_has_a_tag(base in "[a-z0-9-]{1,20}") {
            let content = format!("# NAME: x/y\nFROM {}\n", base);
            let recipe = Recipe::parse(&content, "prop").unwrap();
            prop_assert!(recipe.base_image.contains(':'));
        }
    }
}
