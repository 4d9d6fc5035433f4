use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use gpucontext::mirror::mirror_image;
use gpucontext::{
    ContextExecutor, Effect, ExecutorConfig, ImageSurface, MirrorMode, ReadbackError, SurfaceHandle,
};
use image::{Rgba, RgbaImage};
use pipeline::{
    splice_after, unlink, walk, CaptureCallbacks, CaptureNode, Distributor, EffectNode, Frame,
    ImageSource, NodeKind, PipelineError, PipelineNode, RelayNode, SurfaceRenderer, SurfaceSource,
};

fn executor(name: &str) -> ContextExecutor {
    ContextExecutor::create(ExecutorConfig::software(name).with_size(8, 8)).expect("software executor")
}

/// Waits until every task queued so far on `executor` has run.
fn settle(executor: &ContextExecutor) {
    executor.call(|_| ()).expect("executor alive");
}

fn checkerboard(size: u32, cell: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 17) as u8, (y * 29) as u8, ((x + y) * 7) as u8, 255])
    })
}

fn capture_channel(executor: &ContextExecutor) -> (CaptureNode, Receiver<RgbaImage>) {
    let (tx, rx) = unbounded();
    let capture = CaptureNode::new(
        executor,
        CaptureCallbacks::on_captured(move |image| {
            let _ = tx.send(image);
        }),
    );
    (capture, rx)
}

fn teardown(executor: ContextExecutor, nodes: &[&PipelineNode]) {
    for node in nodes {
        node.dispose().expect("dispose");
    }
    executor.release();
}

#[test]
fn appended_chain_has_one_head_and_walks_in_order() {
    let executor = executor("append");
    let source = SurfaceSource::new(&executor);
    let first = EffectNode::passthrough(&executor);
    let second = EffectNode::new(&executor, Effect::Invert);
    let relay = RelayNode::new(&executor);
    let renderer = SurfaceRenderer::new(&executor, None);

    for node in [&*first, &*second, &*relay, &*renderer] {
        source.append(node).unwrap();
    }

    let members: Vec<PipelineNode> = vec![
        source.node().clone(),
        first.node().clone(),
        second.node().clone(),
        relay.node().clone(),
        renderer.node().clone(),
    ];
    for member in &members {
        assert_eq!(&member.find_head(), source.node());
        assert_eq!(&member.find_tail(), renderer.node());
    }
    assert_eq!(walk(&source), members);

    let extra = EffectNode::passthrough(&executor);
    assert!(matches!(first.append(&extra), Err(PipelineError::Terminal(_))));
    assert!(matches!(
        renderer.set_downstream(Some(extra.node())),
        Err(PipelineError::Terminal(_))
    ));
    assert!(extra.parent().is_none());

    teardown(executor, &members.iter().collect::<Vec<_>>());
}

#[test]
fn passthrough_effects_preserve_pixels() {
    let executor = executor("noop");
    let image = gradient(13, 7);
    let surface = ImageSurface::shared("out", 13, 7);
    let handle: SurfaceHandle = surface.clone();

    let source = SurfaceSource::new(&executor);
    let effects: Vec<EffectNode> = (0..5).map(|_| EffectNode::passthrough(&executor)).collect();
    let renderer = SurfaceRenderer::new(&executor, Some(handle));
    for effect in &effects {
        source.append(effect).unwrap();
    }
    source.append(&renderer).unwrap();

    source.producer().push_frame(image.clone(), None).unwrap();
    settle(&executor);

    assert_eq!(surface.last_frame(), Some(image));
    assert_eq!(renderer.stats().presented, 1);
    for effect in &effects {
        assert_eq!(effect.output_size(), (13, 7));
    }

    let mut nodes = vec![source.node(), renderer.node()];
    nodes.extend(effects.iter().map(EffectNode::node));
    teardown(executor, &nodes);
}

#[test]
fn removed_node_receives_no_further_frames() {
    let executor = executor("remove");
    let source = SurfaceSource::new(&executor);
    let middle = EffectNode::passthrough(&executor);
    let last = EffectNode::passthrough(&executor);
    source.append(&middle).unwrap();
    source.append(&last).unwrap();

    let producer = source.producer();
    producer.push_frame(gradient(4, 4), None).unwrap();
    settle(&executor);
    assert_eq!((middle.rendered(), last.rendered()), (1, 1));

    let textures = |executor: &ContextExecutor| executor.call(|ctx| ctx.texture_count()).unwrap();
    let before = textures(&executor);
    middle.remove().unwrap();
    assert_eq!(textures(&executor), before - 1, "detached effect still owns its texture");
    assert!(source.downstream().is_none());
    assert!(middle.parent().is_none());
    // The removed node keeps its own successor.
    assert_eq!(middle.downstream().as_ref(), Some(last.node()));
    assert_eq!(walk(&source).len(), 1);

    producer.push_frame(gradient(4, 4), None).unwrap();
    producer.push_frame(gradient(4, 4), None).unwrap();
    settle(&executor);
    assert_eq!((middle.rendered(), last.rendered()), (1, 1));
    assert_eq!(source.pushes(), 3);

    // Removing a detached node is a no-op.
    let before = textures(&executor);
    middle.remove().unwrap();
    assert_eq!(textures(&executor), before);

    teardown(executor, &[source.node(), last.node()]);
}

#[test]
fn fanout_children_can_remove_themselves_and_siblings() {
    let executor = executor("fanout");
    let source = SurfaceSource::new(&executor);
    let distributor = Distributor::new(&executor);
    source.set_downstream(Some(distributor.node())).unwrap();

    let counts: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let relays: Vec<RelayNode> = (0..4).map(|_| RelayNode::new(&executor)).collect();
    for relay in &relays {
        distributor.add_child(relay).unwrap();
    }

    // Child 0 removes itself on its first frame; child 1 removes child 3.
    let self_weak = relays[0].downgrade();
    let count = Arc::clone(&counts[0]);
    relays[0].set_tap(move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
        if let Some(node) = self_weak.upgrade() {
            node.remove().unwrap();
        }
    });
    let sibling = relays[3].downgrade();
    let count = Arc::clone(&counts[1]);
    relays[1].set_tap(move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
        if let Some(node) = sibling.upgrade() {
            node.remove().unwrap();
        }
    });
    for index in [2, 3] {
        let count = Arc::clone(&counts[index]);
        relays[index].set_tap(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }

    let producer = source.producer();
    for _ in 0..3 {
        producer.push_frame(checkerboard(8, 2), None).unwrap();
    }
    settle(&executor);

    let seen: Vec<usize> = counts.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(seen, vec![1, 3, 3, 0]);
    assert_eq!(distributor.children(), vec![relays[1].node().clone(), relays[2].node().clone()]);
    assert_eq!(distributor.deliveries(), 3);

    teardown(executor, &[source.node(), distributor.node()]);
}

#[test]
fn distributor_set_downstream_replaces_the_whole_set() {
    let executor = executor("replace-set");
    let distributor = Distributor::new(&executor);
    let a = RelayNode::new(&executor);
    let b = RelayNode::new(&executor);
    let c = RelayNode::new(&executor);
    distributor.add_child(&a).unwrap();
    distributor.add_child(&b).unwrap();
    assert_eq!(distributor.downstream().as_ref(), Some(a.node()));

    distributor.set_downstream(Some(c.node())).unwrap();
    assert_eq!(distributor.children(), vec![c.node().clone()]);
    assert!(a.parent().is_none() && b.parent().is_none());

    assert!(distributor.remove_child(&c).unwrap());
    assert!(!distributor.remove_child(&c).unwrap());
    teardown(executor, &[distributor.node()]);
}

#[test]
fn distributor_child_removal_releases_its_texture() {
    let executor = executor("fanout-release");
    let source = SurfaceSource::new(&executor);
    let distributor = Distributor::new(&executor);
    let effect = EffectNode::passthrough(&executor);
    source.set_downstream(Some(distributor.node())).unwrap();
    distributor.add_child(&effect).unwrap();

    source.producer().push_frame(gradient(4, 4), None).unwrap();
    settle(&executor);
    assert_eq!(effect.rendered(), 1);

    let before = executor.call(|ctx| ctx.texture_count()).unwrap();
    assert!(distributor.remove_child(&effect).unwrap());
    assert_eq!(executor.call(|ctx| ctx.texture_count()).unwrap(), before - 1);
    assert!(effect.parent().is_none());
    teardown(executor, &[source.node(), distributor.node()]);
}

#[test]
fn single_trigger_yields_exactly_one_capture() {
    let executor = executor("trigger");
    let source = SurfaceSource::new(&executor);
    let (capture, captured) = capture_channel(&executor);
    source.set_downstream(Some(capture.node())).unwrap();

    assert!(capture.trigger().unwrap());
    assert!(!capture.trigger().unwrap(), "second trigger must be ignored");
    assert!(capture.is_outstanding());

    let image = gradient(6, 5);
    let producer = source.producer();
    for _ in 0..3 {
        producer.push_frame(image.clone(), None).unwrap();
    }
    settle(&executor);

    assert_eq!(captured.try_iter().collect::<Vec<_>>(), vec![image]);
    assert_eq!(capture.captures(), 1);
    assert_eq!(capture.frames_seen(), 3);
    assert!(!capture.is_outstanding());

    teardown(executor, &[source.node(), capture.node()]);
}

#[test]
fn capture_resolves_frame_transforms() {
    let executor = executor("transform");
    let source = SurfaceSource::new(&executor);
    let (capture, captured) = capture_channel(&executor);
    source.set_downstream(Some(capture.node())).unwrap();
    capture.trigger().unwrap();

    let image = gradient(5, 4);
    let flip = gpucontext::matrix::flip_vertical();
    source.producer().push_frame(image.clone(), Some(flip)).unwrap();
    let received = captured.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(received, mirror_image(&image, MirrorMode::Vertical));

    teardown(executor, &[source.node(), capture.node()]);
}

#[test]
fn burst_delivers_count_captures_spaced_by_interval() {
    let executor = executor("burst");
    let source = ImageSource::new(&executor, checkerboard(16, 4));
    source.set_fps(200.0).unwrap();
    let (tx, rx) = unbounded();
    let capture = CaptureNode::new(
        &executor,
        CaptureCallbacks::on_captured(move |_| {
            let _ = tx.send(Instant::now());
        }),
    );
    source.set_downstream(Some(capture.node())).unwrap();
    source.start().unwrap();

    let interval = Duration::from_millis(60);
    assert!(capture.trigger_burst(3, interval).unwrap());
    let stamps: Vec<Instant> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("burst capture"))
        .collect();
    for pair in stamps.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= interval - Duration::from_millis(5));
    }
    assert!(rx.recv_timeout(Duration::from_millis(250)).is_err(), "burst overran");
    assert_eq!(capture.captures(), 3);

    source.stop().unwrap();
    teardown(executor, &[source.node(), capture.node()]);
}

#[test]
fn mirroring_twice_restores_the_original() {
    let executor = executor("mirror");
    let image = gradient(9, 6);
    for mode in [MirrorMode::Horizontal, MirrorMode::Vertical, MirrorMode::Both] {
        let once_surface = ImageSurface::shared("once", 9, 6);
        let twice_surface = ImageSurface::shared("twice", 9, 6);

        let source = SurfaceSource::new(&executor);
        let first = EffectNode::passthrough(&executor);
        first.set_mirror(mode).unwrap();
        let distributor = Distributor::new(&executor);
        let once = SurfaceRenderer::new(&executor, Some(once_surface.clone() as SurfaceHandle));
        let second = EffectNode::passthrough(&executor);
        second.set_mirror(mode).unwrap();
        let twice = SurfaceRenderer::new(&executor, Some(twice_surface.clone() as SurfaceHandle));

        source.append(&first).unwrap();
        source.append(&distributor).unwrap();
        distributor.add_child(&once).unwrap();
        distributor.add_child(&second).unwrap();
        second.set_downstream(Some(twice.node())).unwrap();

        source.producer().push_frame(image.clone(), None).unwrap();
        settle(&executor);

        assert_eq!(once_surface.last_frame(), Some(mirror_image(&image, mode)), "{mode:?}");
        assert_eq!(twice_surface.last_frame(), Some(image.clone()), "{mode:?}");

        for node in [&*source, &*first, &*distributor, &*once, &*second, &*twice] {
            node.dispose().unwrap();
        }
    }
    executor.release();
}

#[test]
fn checkerboard_reaches_capture_within_deadline() {
    let executor = executor("checker");
    let board = checkerboard(128, 16);
    let source = ImageSource::new(&executor, board.clone());
    let effect = EffectNode::passthrough(&executor);
    let (capture, captured) = capture_channel(&executor);
    source.append(&effect).unwrap();
    source.append(&capture).unwrap();

    source.start().unwrap();
    capture.trigger().unwrap();
    let image = captured
        .recv_timeout(Duration::from_millis(1200))
        .expect("capture within 1.2s");
    assert_eq!(image, board);
    assert!(source.is_running());

    source.stop().unwrap();
    assert!(!source.is_running());
    teardown(executor, &[source.node(), effect.node(), capture.node()]);
}

#[test]
fn self_capturing_children_stop_after_thirty_deliveries() {
    let executor = executor("split");
    let board = checkerboard(32, 8);
    let source = ImageSource::new(&executor, board.clone());
    source.set_fps(120.0).unwrap();
    let distributor = Distributor::new(&executor);
    source.set_downstream(Some(distributor.node())).unwrap();

    let (tx, rx) = unbounded();
    let mut captures = Vec::new();
    for name in ["a", "b"] {
        let capture = CaptureNode::named(&executor, name, CaptureCallbacks::on_captured(|_| {}));
        let weak = capture.downgrade();
        let tx = tx.clone();
        capture.set_callbacks(CaptureCallbacks::on_captured(move |image| {
            let _ = tx.send((name, image));
            if let Some(node) = weak.upgrade() {
                node.remove().unwrap();
            }
        }));
        capture.trigger_after_frames(30).unwrap();
        distributor.add_child(&capture).unwrap();
        captures.push(capture);
    }

    source.start().unwrap();
    let mut received: Vec<(&str, RgbaImage)> = (0..2)
        .map(|_| rx.recv_timeout(Duration::from_secs(3)).expect("self capture"))
        .collect();
    received.sort_by_key(|(name, _)| *name);
    assert_eq!(received[0], ("a", board.clone()));
    assert_eq!(received[1], ("b", board.clone()));

    thread::sleep(Duration::from_millis(100));
    for capture in &captures {
        assert_eq!(capture.frames_seen(), 30, "{}", capture.label());
        assert!(!capture.is_attached());
    }
    assert!(distributor.children().is_empty());

    source.stop().unwrap();
    let mut nodes = vec![source.node(), distributor.node()];
    nodes.extend(captures.iter().map(CaptureNode::node));
    teardown(executor, &nodes);
}

#[test]
fn relay_heals_and_splices_reconnect() {
    let executor = executor("relay");
    let source = SurfaceSource::new(&executor);
    let relay = RelayNode::new(&executor);
    let renderer = SurfaceRenderer::new(&executor, None);
    source.append(&relay).unwrap();
    source.append(&renderer).unwrap();

    relay.remove().unwrap();
    assert_eq!(source.downstream().as_ref(), Some(renderer.node()));
    assert_eq!(renderer.parent().as_ref(), Some(source.node()));
    assert!(relay.downstream().is_none());

    let effect = EffectNode::passthrough(&executor);
    splice_after(&source, &effect).unwrap();
    assert_eq!(
        walk(&source),
        vec![source.node().clone(), effect.node().clone(), renderer.node().clone()]
    );

    unlink(&effect).unwrap();
    assert_eq!(walk(&source), vec![source.node().clone(), renderer.node().clone()]);
    assert!(effect.parent().is_none() && effect.downstream().is_none());

    let distributor = Distributor::new(&executor);
    renderer.remove().unwrap();
    source.set_downstream(Some(distributor.node())).unwrap();
    splice_after(&distributor, &relay).unwrap();
    splice_after(&distributor, &renderer).unwrap();
    assert_eq!(distributor.children(), vec![relay.node().clone(), renderer.node().clone()]);
    assert_eq!(relay.kind(), NodeKind::Relay);

    teardown(executor, &[source.node(), distributor.node(), effect.node()]);
}

#[test]
fn renderer_skips_without_surface_and_limits_rate() {
    let executor = executor("renderer");
    let source = SurfaceSource::new(&executor);
    let renderer = SurfaceRenderer::new(&executor, None);
    source.set_downstream(Some(renderer.node())).unwrap();
    let producer = source.producer();
    let image = gradient(4, 4);

    producer.push_frame(image.clone(), None).unwrap();
    producer.push_frame(image.clone(), None).unwrap();
    settle(&executor);
    assert_eq!(renderer.stats().skipped, 2);
    assert_eq!(renderer.stats().presented, 0);

    let surface = ImageSurface::shared("window", 4, 4);
    renderer.set_surface(Some(surface.clone() as SurfaceHandle)).unwrap();
    renderer.set_max_fps(5.0).unwrap();
    for _ in 0..5 {
        producer.push_frame(image.clone(), None).unwrap();
    }
    settle(&executor);
    let stats = renderer.stats();
    assert_eq!(stats.presented, 1);
    assert_eq!(stats.dropped, 4);
    assert_eq!(surface.last_frame(), Some(image.clone()));

    renderer.set_mirror(MirrorMode::Horizontal).unwrap();
    thread::sleep(Duration::from_millis(200));
    producer.push_frame(image.clone(), None).unwrap();
    settle(&executor);
    assert_eq!(renderer.stats().presented, 2);
    assert_eq!(surface.last_frame(), Some(mirror_image(&image, MirrorMode::Horizontal)));

    teardown(executor, &[source.node(), renderer.node()]);
}

#[test]
fn disabled_node_forwards_frames_unchanged() {
    let executor = executor("disabled");
    let source = SurfaceSource::new(&executor);
    let effect = EffectNode::new(&executor, Effect::Invert);
    let (capture, captured) = capture_channel(&executor);
    source.append(&effect).unwrap();
    source.append(&capture).unwrap();
    effect.set_enabled(false);

    let image = gradient(5, 5);
    capture.trigger().unwrap();
    source.producer().push_frame(image.clone(), None).unwrap();
    assert_eq!(captured.recv_timeout(Duration::from_secs(2)).unwrap(), image);
    assert_eq!(effect.rendered(), 0);

    teardown(executor, &[source.node(), effect.node(), capture.node()]);
}

#[test]
fn grayscale_effect_applies_luma() {
    let executor = executor("gray");
    let source = SurfaceSource::new(&executor);
    let effect = EffectNode::passthrough(&executor);
    effect.set_effect_index(1).unwrap();
    assert_eq!(effect.effect(), Effect::Grayscale);
    assert!(effect.set_effect_index(99).is_err());
    let (capture, captured) = capture_channel(&executor);
    source.append(&effect).unwrap();
    source.append(&capture).unwrap();

    capture.trigger().unwrap();
    source
        .producer()
        .push_frame(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])), None)
        .unwrap();
    let image = captured.recv_timeout(Duration::from_secs(2)).unwrap();
    let pixel = image.get_pixel(0, 0);
    assert_eq!(pixel[0], pixel[1]);
    assert_eq!(pixel[1], pixel[2]);
    assert!((70..=80).contains(&pixel[0]), "luma of red was {}", pixel[0]);

    teardown(executor, &[source.node(), effect.node(), capture.node()]);
}

#[test]
fn producer_outliving_its_source_is_inert() {
    let executor = executor("producer");
    let producer = {
        let source = SurfaceSource::new(&executor);
        source.producer()
    };
    assert!(!producer.is_connected());
    producer.push_frame(gradient(2, 2), None).unwrap();
    producer.signal().unwrap();
    settle(&executor);
    executor.release();
    assert!(producer.push_frame(gradient(2, 2), None).is_err());
}

#[test]
fn signal_redelivers_the_last_picture() {
    let executor = executor("signal");
    let source = SurfaceSource::new(&executor);
    let effect = EffectNode::passthrough(&executor);
    source.set_downstream(Some(effect.node())).unwrap();
    let producer = source.producer();

    producer.signal().unwrap();
    settle(&executor);
    assert_eq!(effect.rendered(), 0);

    producer.push_frame(gradient(3, 3), None).unwrap();
    producer.signal().unwrap();
    producer.signal().unwrap();
    settle(&executor);
    assert_eq!(effect.rendered(), 3);
    assert_eq!(source.pushes(), 1);

    teardown(executor, &[source.node(), effect.node()]);
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "chain integrity"))]
fn linking_across_executors_is_an_integrity_violation() {
    let left = executor("left");
    let right = executor("right");
    let a = RelayNode::new(&left);
    let b = RelayNode::new(&right);
    let err = a.set_downstream(Some(b.node())).unwrap_err();
    assert!(matches!(err, PipelineError::ChainIntegrity(_)));
    left.release();
    right.release();
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "chain integrity"))]
fn cycles_are_an_integrity_violation() {
    let executor = executor("cycle");
    let a = RelayNode::new(&executor);
    let b = RelayNode::new(&executor);
    a.set_downstream(Some(b.node())).unwrap();
    let err = b.set_downstream(Some(a.node())).unwrap_err();
    assert!(matches!(err, PipelineError::ChainIntegrity(_)));
    assert_eq!(b.downstream(), None);
    executor.release();
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "chain integrity"))]
fn splicing_an_attached_node_is_an_integrity_violation() {
    let executor = executor("splice");
    let a = RelayNode::new(&executor);
    let b = RelayNode::new(&executor);
    let c = RelayNode::new(&executor);
    a.set_downstream(Some(b.node())).unwrap();
    let err = splice_after(&c, &b).unwrap_err();
    assert!(matches!(err, PipelineError::ChainIntegrity(_)));
    executor.release();
}

#[test]
fn released_executor_rejects_node_mutations() {
    let executor = executor("released");
    let a = RelayNode::new(&executor);
    let b = RelayNode::new(&executor);
    executor.release();
    assert!(matches!(
        a.set_downstream(Some(b.node())),
        Err(PipelineError::Context(_))
    ));
}

#[test]
fn readback_failure_abandons_the_burst() {
    let executor = executor("readback-failure");
    let (captured_tx, captured) = unbounded();
    let (error_tx, errors) = unbounded::<ReadbackError>();
    let capture = CaptureNode::new(
        &executor,
        CaptureCallbacks::new(
            move |image| {
                let _ = captured_tx.send(image);
            },
            move |err| {
                let _ = error_tx.send(err);
            },
        ),
    );
    assert!(capture.trigger_burst(3, Duration::from_millis(30)).unwrap());
    assert!(capture.is_outstanding());

    let node = capture.node().clone();
    executor
        .call(move |ctx| -> gpucontext::ContextResult<()> {
            let texture = ctx.upload_texture(&gradient(4, 4))?;
            let stale = texture.id();
            ctx.release_texture(texture)?;
            node.on_frame_available(ctx, Frame::new(stale, 4, 4));
            Ok(())
        })
        .unwrap()
        .unwrap();

    let err = errors.recv_timeout(Duration::from_secs(1)).expect("readback error");
    assert!(matches!(err, ReadbackError::UnknownTexture(_)), "unexpected error {err:?}");
    assert!(!capture.is_outstanding());
    assert_eq!(capture.captures(), 0);

    // Past the burst interval nothing re-arms, so a good frame is not captured.
    thread::sleep(Duration::from_millis(100));
    let node = capture.node().clone();
    executor
        .call(move |ctx| -> gpucontext::ContextResult<()> {
            let texture = ctx.upload_texture(&gradient(4, 4))?;
            node.on_frame_available(ctx, Frame::new(texture.id(), 4, 4));
            ctx.release_texture(texture)?;
            Ok(())
        })
        .unwrap()
        .unwrap();
    settle(&executor);

    assert!(errors.try_recv().is_err(), "only one error per trigger");
    assert!(captured.try_recv().is_err());
    assert_eq!(capture.captures(), 0);
    assert_eq!(capture.frames_seen(), 2);
    assert!(!capture.is_outstanding());
    teardown(executor, &[capture.node()]);
}
