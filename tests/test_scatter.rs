// tests/test_scatter.rs — Integration tests for load_textures on the CPU loader.
//
// These run with `cargo test --test test_scatter`.
// Only the public API is used: tensors are built on the host, passed to the
// entry points, and inspected with `to_vec` / `get`.

use texload::{
    load_textures, load_textures_in_place, ArgumentProblem, LoaderConfig, Tensor, TexLoadError,
    TextureLoader, UpdateGranularity,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loader(check_single_writer: bool) -> TextureLoader {
    TextureLoader::new(LoaderConfig {
        check_single_writer,
        min_items_per_task: 1,
        ..Default::default()
    })
    .unwrap()
}

/// One face per pixel of an H×W×C image, colour = (y, x, y * W + x).
fn one_face_per_pixel(h: usize, w: usize) -> (Tensor<i32>, Tensor<f32>) {
    let mut faces = Vec::new();
    let mut tex = Vec::new();
    for y in 0..h {
        for x in 0..w {
            faces.extend([y as i32, x as i32]);
            tex.extend([y as f32, x as f32, (y * w + x) as f32]);
        }
    }
    (
        Tensor::from_vec(&[1, h * w, 2], faces),
        Tensor::from_vec(&[1, h * w, 3], tex),
    )
}

// ===== Concrete scenario =====

#[test]
fn single_face_writes_single_pixel() {
    init_logging();
    let image = Tensor::<f32>::zeros(&[1, 1, 2, 2, 3]);
    let faces = Tensor::<i32>::from_vec(&[1, 1, 3], vec![0, 0, 0]);
    let textures = Tensor::<f32>::from_vec(&[1, 1, 3], vec![1.0, 0.0, 0.0]);
    let is_update = Tensor::from_flags(&[2, 2], &[true, false, false, false]);

    let out = load_textures(&loader(true), &image, &faces, &textures, &is_update).unwrap();
    assert_eq!(out.shape(), image.shape());
    assert_eq!(
        out.to_vec(),
        vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
    );
}

// ===== Gating =====

#[test]
fn all_false_flags_leave_image_unchanged() {
    let (h, w) = (5, 7);
    let image = Tensor::<f32>::from_vec(&[1, h, w, 3], (0..h * w * 3).map(|v| v as f32 * 0.1).collect());
    let (faces, textures) = one_face_per_pixel(h, w);
    let is_update = Tensor::<i32>::zeros(&[1, h * w]);

    let out = load_textures(&loader(true), &image, &faces, &textures, &is_update).unwrap();
    assert_eq!(out.to_vec(), image.to_vec());
}

#[test]
fn unique_writers_copy_texture_exactly() {
    let (h, w) = (6, 4);
    let image = Tensor::<f32>::full(&[1, h, w, 3], -1.0);
    let (faces, textures) = one_face_per_pixel(h, w);
    let is_update = Tensor::<i32>::full(&[1, h * w], 1);

    let out = load_textures(&loader(true), &image, &faces, &textures, &is_update).unwrap();
    for y in 0..h {
        for x in 0..w {
            assert_eq!(out.get(&[0, y, x, 0]), y as f32);
            assert_eq!(out.get(&[0, y, x, 1]), x as f32);
            assert_eq!(out.get(&[0, y, x, 2]), (y * w + x) as f32);
        }
    }
}

#[test]
fn per_face_flags_gate_every_sample_of_a_face() {
    // Two faces, each with a 1×2 sample grid, on a 2×3 image.
    let image = Tensor::<f32>::zeros(&[1, 2, 3, 1]);
    let faces = Tensor::<i32>::from_vec(&[1, 2, 1, 2, 2], vec![0, 0, 0, 1, 1, 0, 1, 1]);
    let textures = Tensor::<f32>::from_vec(&[1, 2, 1, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let is_update = Tensor::<i32>::from_vec(&[1, 2], vec![0, 1]);

    let out = load_textures(&loader(true), &image, &faces, &textures, &is_update).unwrap();
    assert_eq!(out.to_vec(), vec![0.0, 0.0, 0.0, 3.0, 4.0, 0.0]);
}

#[test]
fn per_sample_flags_gate_individual_samples() {
    let image = Tensor::<f32>::zeros(&[1, 2, 2, 1]);
    let faces = Tensor::<i32>::from_vec(&[1, 2, 1, 2, 2], vec![0, 0, 0, 1, 1, 0, 1, 1]);
    let textures = Tensor::<f32>::from_vec(&[1, 2, 1, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let is_update = Tensor::<i32>::from_vec(&[1, 2, 1, 2], vec![1, 0, 0, 1]);

    let out = load_textures(&loader(true), &image, &faces, &textures, &is_update).unwrap();
    assert_eq!(out.to_vec(), vec![1.0, 0.0, 0.0, 4.0]);
}

#[test]
fn per_pixel_mask_broadcasts_over_batch() {
    // Batch of 2; mask (H, W) applies to both.
    let image = Tensor::<f32>::zeros(&[2, 1, 2, 1]);
    let faces = Tensor::<i32>::from_vec(&[2, 2, 2], vec![0, 0, 0, 1, 0, 0, 0, 1]);
    let textures = Tensor::<f32>::from_vec(&[2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let mask = Tensor::from_flags(&[1, 2], &[false, true]);

    let out = load_textures(&loader(true), &image, &faces, &textures, &mask).unwrap();
    assert_eq!(out.to_vec(), vec![0.0, 2.0, 0.0, 4.0]);
}

#[test]
fn ambiguous_mask_rejected_until_granularity_is_forced() {
    // (1, 2) fits both per-sample flags and a 1×2 pixel mask.
    let image = Tensor::<f32>::zeros(&[1, 1, 2, 1]);
    let faces = Tensor::<i32>::from_vec(&[1, 2, 2], vec![0, 1, 0, 0]);
    let textures = Tensor::<f32>::from_vec(&[1, 2, 1], vec![5.0, 6.0]);
    let flags = Tensor::<i32>::from_vec(&[1, 2], vec![1, 0]);

    let err = load_textures(&loader(true), &image, &faces, &textures, &flags).unwrap_err();
    assert!(matches!(err, TexLoadError::ShapeMismatch(_)), "{err}");
    assert!(err.to_string().contains("update_granularity"), "{err}");

    let forced = |g| {
        TextureLoader::new(LoaderConfig { update_granularity: Some(g), ..Default::default() }).unwrap()
    };
    let per_sample = load_textures(&forced(UpdateGranularity::PerSample), &image, &faces, &textures, &flags);
    assert_eq!(per_sample.unwrap().to_vec(), vec![0.0, 5.0]);
    let per_pixel = load_textures(&forced(UpdateGranularity::PerPixel), &image, &faces, &textures, &flags);
    assert_eq!(per_pixel.unwrap().to_vec(), vec![6.0, 0.0]);
}

#[test]
fn batched_pixel_mask_shaped_like_faces_is_not_guessed() {
    // Two batches of three faces on a 2×3 image: (B, F) == (H, W). Only
    // pixel (1, 0) is enabled by the mask.
    let image = Tensor::<f32>::zeros(&[2, 2, 3, 1]);
    let faces = Tensor::<i32>::from_vec(&[2, 3, 2], vec![1, 0, 0, 1, 0, 2, 1, 0, 0, 0, 1, 2]);
    let textures = Tensor::<f32>::from_vec(&[2, 3, 1], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let mask = Tensor::from_flags(&[2, 3], &[false, false, false, true, false, false]);

    let err = load_textures(&loader(true), &image, &faces, &textures, &mask).unwrap_err();
    assert!(matches!(err, TexLoadError::ShapeMismatch(_)), "{err}");

    let per_pixel = TextureLoader::new(LoaderConfig {
        update_granularity: Some(UpdateGranularity::PerPixel),
        ..Default::default()
    })
    .unwrap();
    let out = load_textures(&per_pixel, &image, &faces, &textures, &mask).unwrap();
    assert_eq!(
        out.to_vec(),
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0]
    );
}

// ===== Idempotence and boundaries =====

#[test]
fn repeated_calls_produce_identical_output() {
    let (h, w) = (8, 8);
    let image = Tensor::<f32>::zeros(&[1, h, w, 3]);
    let (faces, textures) = one_face_per_pixel(h, w);
    let flags: Vec<bool> = (0..h * w).map(|i| i % 2 == 0).collect();
    let is_update = Tensor::from_flags(&[1, h * w], &flags);

    let l = loader(true);
    let a = load_textures(&l, &image, &faces, &textures, &is_update).unwrap();
    let b = load_textures(&l, &image, &faces, &textures, &is_update).unwrap();
    assert_eq!(a.to_vec(), b.to_vec());
}

#[test]
fn zero_faces_leave_image_unchanged() {
    let image = Tensor::<f32>::from_vec(&[1, 2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let faces = Tensor::<i32>::zeros(&[1, 0, 2]);
    let textures = Tensor::<f32>::zeros(&[1, 0, 1]);
    for flags in [Tensor::<i32>::zeros(&[1, 0]), Tensor::<i32>::full(&[2, 2], 1)] {
        let out = load_textures(&loader(true), &image, &faces, &textures, &flags).unwrap();
        assert_eq!(out.to_vec(), image.to_vec());
    }
}

#[test]
fn in_place_variant_mutates_argument() {
    let mut image = Tensor::<f32>::zeros(&[1, 1, 2, 1]);
    let faces = Tensor::<i32>::from_vec(&[1, 1, 2], vec![0, 1]);
    let textures = Tensor::<f32>::from_vec(&[1, 1, 1], vec![9.0]);
    let flags = Tensor::<i32>::from_vec(&[1, 1], vec![1]);
    load_textures_in_place(&loader(true), &mut image, &faces, &textures, &flags).unwrap();
    assert_eq!(image.to_vec(), vec![0.0, 9.0]);
}

// ===== Rejections =====

#[test]
fn non_contiguous_textures_rejected_by_name() {
    let mut image = Tensor::<f32>::full(&[1, 2, 2, 2], 7.0);
    let faces = Tensor::<i32>::from_vec(&[1, 2, 2], vec![0, 0, 1, 1]);
    // (1, 2, 2) viewed through a transpose of its last two axes.
    let textures = Tensor::<f32>::from_vec(&[1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).transpose(1, 2);
    let flags = Tensor::<i32>::from_vec(&[1, 2], vec![1, 1]);

    let err = load_textures_in_place(&loader(true), &mut image, &faces, &textures, &flags).unwrap_err();
    assert_eq!(err.tensor(), Some("textures"));
    assert!(matches!(
        err,
        TexLoadError::InvalidArgument { problem: ArgumentProblem::NotContiguous { .. }, .. }
    ));
    assert!(err.to_string().contains("textures"), "{err}");
    assert_eq!(image.to_vec(), vec![7.0; 8]);
}

#[test]
fn update_flags_are_checked_before_textures() {
    // Both buffers are padded views; the flags are reported first.
    let mut image = Tensor::<f32>::zeros(&[1, 2, 3, 1]);
    let faces = Tensor::<i32>::from_vec(&[1, 2, 2], vec![0, 0, 1, 1]);
    let textures = Tensor::<f32>::from_vec_strided(&[1, 2, 1], &[4, 2, 1], 0, vec![1.0, 0.0, 2.0, 0.0]);
    let flags = Tensor::<i32>::from_vec_strided(&[1, 2], &[4, 2], 0, vec![1, 0, 1, 0]);
    assert!(!textures.is_contiguous() && !flags.is_contiguous());

    let err = load_textures_in_place(&loader(true), &mut image, &faces, &textures, &flags).unwrap_err();
    assert_eq!(err.tensor(), Some("is_update"));
    assert!(matches!(
        err,
        TexLoadError::InvalidArgument { problem: ArgumentProblem::NotContiguous { .. }, .. }
    ));
    assert_eq!(image.to_vec(), vec![0.0; 6]);
}

#[test]
fn non_contiguous_image_rejected_by_name() {
    let image = Tensor::<f32>::zeros(&[1, 2, 3, 1]).transpose(1, 2);
    let faces = Tensor::<i32>::from_vec(&[1, 1, 2], vec![0, 0]);
    let textures = Tensor::<f32>::zeros(&[1, 1, 1]);
    let flags = Tensor::<i32>::from_vec(&[1, 1], vec![1]);
    let err = load_textures(&loader(true), &image, &faces, &textures, &flags).unwrap_err();
    assert_eq!(err.tensor(), Some("image"));
}

#[test]
fn out_of_range_and_negative_coordinates_rejected() {
    let original = vec![0.5f32; 6];
    for coords in [[0, 3], [-1, 0], [2, 0], [0, -3]] {
        let mut image = Tensor::<f32>::from_vec(&[1, 2, 3, 1], original.clone());
        let faces = Tensor::<i32>::from_vec(&[1, 2, 2], vec![1, 1, coords[0], coords[1]]);
        let textures = Tensor::<f32>::from_vec(&[1, 2, 1], vec![1.0, 2.0]);
        let flags = Tensor::<i32>::from_vec(&[1, 2], vec![1, 1]);

        let err = load_textures_in_place(&loader(false), &mut image, &faces, &textures, &flags)
            .unwrap_err();
        match err {
            TexLoadError::InvalidArgument {
                tensor: "faces",
                problem: ArgumentProblem::IndexOutOfRange { item, axis, bound, .. },
            } => {
                let expected_axis = if (0..2).contains(&coords[0]) { 1 } else { 0 };
                assert_eq!(item, 1);
                assert_eq!(axis, expected_axis);
                assert_eq!(bound, [2, 3][axis]);
            }
            other => panic!("{coords:?}: unexpected error {other:?}"),
        }
        assert_eq!(image.to_vec(), original, "{coords:?} mutated the image");
    }
}

#[test]
fn shape_mismatch_reported() {
    let image = Tensor::<f32>::zeros(&[1, 2, 2, 3]);
    let faces = Tensor::<i32>::zeros(&[1, 1, 2]);
    let textures = Tensor::<f32>::zeros(&[1, 1, 4]);
    let flags = Tensor::<i32>::zeros(&[1, 1]);
    let err = load_textures(&loader(true), &image, &faces, &textures, &flags).unwrap_err();
    assert!(matches!(err, TexLoadError::ShapeMismatch(_)));
}

// ===== Conflicting writers =====

#[test]
fn conflict_check_rejects_duplicates_without_mutation() {
    let mut image = Tensor::<f32>::zeros(&[1, 2, 2, 1]);
    let faces = Tensor::<i32>::from_vec(&[1, 3, 2], vec![0, 0, 1, 1, 1, 1]);
    let textures = Tensor::<f32>::from_vec(&[1, 3, 1], vec![1.0, 2.0, 3.0]);
    let flags = Tensor::<i32>::from_vec(&[1, 3], vec![1, 1, 1]);

    let err = load_textures_in_place(&loader(true), &mut image, &faces, &textures, &flags).unwrap_err();
    assert!(matches!(
        err,
        TexLoadError::ConflictingWriters { pixel: 3, first_item: 1, second_item: 2 }
    ));
    assert_eq!(image.to_vec(), vec![0.0; 4]);
}

#[test]
fn duplicates_resolve_to_highest_item_when_unchecked() {
    let (h, w) = (4, 4);
    let image = Tensor::<f32>::zeros(&[1, h, w, 3]);
    // Every pixel gets written by 5 faces; face index encoded in the colour.
    let n = h * w * 5;
    let mut faces = Vec::new();
    let mut tex = Vec::new();
    for i in 0..n {
        let p = i % (h * w);
        faces.extend([(p / w) as i32, (p % w) as i32]);
        tex.extend([i as f32; 3]);
    }
    let faces = Tensor::from_vec(&[1, n, 2], faces);
    let textures = Tensor::from_vec(&[1, n, 3], tex);
    let flags = Tensor::<i32>::full(&[1, n], 1);

    let l = loader(false);
    let first = load_textures(&l, &image, &faces, &textures, &flags).unwrap();
    for _ in 0..5 {
        let again = load_textures(&l, &image, &faces, &textures, &flags).unwrap();
        assert_eq!(again.to_vec(), first.to_vec());
    }
    for p in 0..h * w {
        let winner = (4 * h * w + p) as f32;
        assert_eq!(first.get(&[0, p / w, p % w, 0]), winner);
        // All channels come from the same sample.
        assert_eq!(first.get(&[0, p / w, p % w, 2]), winner);
    }
}

#[test]
fn dedicated_thread_pool_gives_same_result() {
    let (h, w) = (16, 16);
    let image = Tensor::<f32>::zeros(&[1, h, w, 3]);
    let (faces, textures) = one_face_per_pixel(h, w);
    let flags = Tensor::<i32>::full(&[1, h * w], 1);

    let pooled = TextureLoader::new(LoaderConfig { num_threads: Some(3), ..Default::default() }).unwrap();
    let a = load_textures(&pooled, &image, &faces, &textures, &flags).unwrap();
    let b = load_textures(&loader(true), &image, &faces, &textures, &flags).unwrap();
    assert_eq!(a.to_vec(), b.to_vec());
}
