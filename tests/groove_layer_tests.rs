#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use groove_engine::emitter::{Delivery, EmitTrigger};
    use groove_engine::probe::ProbeStateTag;
    use groove_engine::{
        ChangePolicy, DensityTarget, Emission, EngineContext, EngineStatus, EventType, GrooveConfig,
        GrooveLayer, Grid, JsonFileTraitStore, JsonLinesSink, LoopPolicy, PerformanceEvent, PlayerId,
        PlayerSession, ReasonTag, SessionMeta, SlowTraits, TempoPolicy, TraitStore,
    };
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const WINDOW_MS: u64 = 15_000;

    fn ctx() -> EngineContext {
        EngineContext::new(80.0, Grid::Quarter)
    }

    fn started(cfg: GrooveConfig) -> GrooveLayer {
        let mut layer = GrooveLayer::new(cfg, SessionMeta::new("ada", "pedalboard", "s1")).unwrap();
        layer.start_session(SlowTraits::default(), 0).unwrap();
        layer
    }

    /// Twenty quarter notes at 80 BPM; odd onsets pushed late by `jitter_ms`.
    fn play(layer: &GrooveLayer, window: u64, jitter_ms: u64) {
        let start = window * WINDOW_MS;
        for i in 0..20u64 {
            let t = start + i * 750 + if i % 2 == 1 { jitter_ms } else { 0 };
            layer.push_event(PerformanceEvent::new(t, EventType::NoteOnset, 0.7, 0.9));
        }
    }

    fn close(layer: &mut GrooveLayer, window: u64, context: Option<&EngineContext>) -> Emission {
        layer.close_window((window + 1) * WINDOW_MS, context).unwrap()
    }

    fn experiment_config() -> GrooveConfig {
        let mut cfg = GrooveConfig::default();
        cfg.probe.interval_ms = 60_000;
        cfg.probe.duration_ms = 30_000;
        cfg
    }

    // ========== Reference Vectors ==========

    #[test]
    fn test_first_even_window_follows_player() {
        let mut layer = started(GrooveConfig::default());
        play(&layer, 0, 0);
        let e = close(&mut layer, 0, Some(&ctx()));

        assert_eq!(e.schema_id, "groove_layer_control");
        assert_eq!(e.schema_version, "v0");
        assert_eq!(e.output.tempo_policy, TempoPolicy::FollowPlayer);
        assert_eq!(e.output.loop_policy, LoopPolicy::None);
        assert_eq!(e.output.density_target, DensityTarget::Medium);
        assert_eq!(e.output.change_policy, ChangePolicy::AvoidModulation);
        assert_eq!(e.output.reason, ReasonTag::StableBaseline);
        assert_eq!(e.notes, ReasonTag::StableBaseline.notes());
        assert_eq!(e.window.start_ms, 0);
        assert_eq!(e.window.end_ms, WINDOW_MS);
    }

    #[test]
    fn test_unstable_burst_simplifies_and_never_arms() {
        let mut layer = started(GrooveConfig::default());
        for w in 0..6 {
            play(&layer, w, 0);
            let e = close(&mut layer, w, Some(&ctx()));
            assert_eq!(e.probe_state, ProbeStateTag::Idle);
        }
        for w in 6..10 {
            play(&layer, w, 70);
            let e = close(&mut layer, w, Some(&ctx()));
            assert_eq!(e.output.tempo_policy, TempoPolicy::SteadyClock, "window {w}");
            assert_eq!(e.output.density_target, DensityTarget::Sparse, "window {w}");
            assert_eq!(e.output.loop_policy, LoopPolicy::TwoBars, "window {w}");
            assert_eq!(e.output.reason, ReasonTag::LowTimingStability, "window {w}");
            assert_eq!(e.probe_state, ProbeStateTag::Idle);
        }
    }

    #[test]
    fn test_missing_context_freezes_loop_and_blocks_probing() {
        // Forty windows is well past the default probe interval.
        let mut layer = started(GrooveConfig::default());
        for w in 0..40 {
            play(&layer, w, 0);
            let e = close(&mut layer, w, None);
            assert_eq!(e.output.loop_policy, LoopPolicy::None, "window {w}");
            assert_eq!(e.output.reason, ReasonTag::MissingContext, "window {w}");
            assert_ne!(e.probe_state, ProbeStateTag::Armed);
            assert_ne!(e.probe_state, ProbeStateTag::Probing);
        }
        assert!(layer.degradation().unwrap().context_missing);
    }

    #[test]
    fn test_empty_windows_hold_steady_clock() {
        let mut layer = started(GrooveConfig::default());
        let mut warm = None;
        for w in 0..4 {
            play(&layer, w, 0);
            warm = Some(close(&mut layer, w, Some(&ctx())));
        }
        let warm = warm.unwrap().output;

        for w in 4..24 {
            let e = close(&mut layer, w, Some(&ctx()));
            assert_eq!(e.window.event_count, 0);
            if w >= 5 {
                assert_eq!(e.output.tempo_policy, TempoPolicy::SteadyClock, "window {w}");
                assert_eq!(e.output.reason, ReasonTag::StreamDegraded, "window {w}");
                assert_eq!(e.output.window_confidence, 0.0);
            }
            assert_eq!(e.output.loop_policy, warm.loop_policy, "window {w}");
            assert_eq!(e.output.density_target, warm.density_target, "window {w}");
            assert_eq!(e.output.change_policy, warm.change_policy, "window {w}");
        }

        // One good window recovers the stream.
        play(&layer, 24, 0);
        let e = close(&mut layer, 24, Some(&ctx()));
        assert_ne!(e.output.reason, ReasonTag::StreamDegraded);
        assert!(!layer.degradation().unwrap().stream_degraded);
    }

    #[test]
    fn test_alternating_windows_escalate_once_and_hold() {
        let meta = SessionMeta::new("ada", "pedalboard", "s1");
        let mut layer = GrooveLayer::new(GrooveConfig::default(), meta).unwrap();
        layer.start_session(SlowTraits::uniform(0.8), 0).unwrap();

        let mut previous = None;
        let mut flips = 0;
        for w in 0..20 {
            play(&layer, w, if w % 2 == 0 { 0 } else { 70 });
            let e = close(&mut layer, w, Some(&ctx()));
            let controls = (e.output.tempo_policy, e.output.density_target, e.output.loop_policy);
            if previous.is_some_and(|p| p != controls) {
                flips += 1;
            }
            previous = Some(controls);
            if w >= 1 {
                assert_eq!(e.output.tempo_policy, TempoPolicy::SteadyClock, "window {w}");
                assert_eq!(e.output.loop_policy, LoopPolicy::TwoBars, "window {w}");
            }
        }
        assert_eq!(flips, 1);
    }

    #[test]
    fn test_two_stable_windows_restore_following() {
        let mut layer = started(GrooveConfig::default());
        for w in 0..4 {
            play(&layer, w, 0);
            close(&mut layer, w, Some(&ctx()));
        }
        play(&layer, 4, 70);
        let e = close(&mut layer, 4, Some(&ctx()));
        assert_eq!(e.output.tempo_policy, TempoPolicy::SteadyClock);

        play(&layer, 5, 0);
        let e = close(&mut layer, 5, Some(&ctx()));
        assert_eq!(e.output.tempo_policy, TempoPolicy::SteadyClock);
        assert_eq!(e.output.reason, ReasonTag::StabilityRecovering);

        play(&layer, 6, 0);
        let e = close(&mut layer, 6, Some(&ctx()));
        assert_ne!(e.output.tempo_policy, TempoPolicy::SteadyClock);
    }

    // ========== Probing ==========

    #[test]
    fn test_candidate_commits_when_stability_holds() {
        let mut layer = started(experiment_config());
        let mut emissions = Vec::new();
        for w in 0..8 {
            play(&layer, w, 0);
            emissions.push(close(&mut layer, w, Some(&ctx())));
        }

        assert_eq!(emissions[3].probe_state, ProbeStateTag::Armed);
        assert_eq!(emissions[4].output.reason, ReasonTag::ProbeActive);
        assert_eq!(emissions[4].output.density_target, DensityTarget::Full);
        assert_eq!(emissions[5].output.reason, ReasonTag::ProbeActive);

        assert_eq!(emissions[6].output.reason, ReasonTag::ProbeCommitted);
        assert_eq!(emissions[6].output.density_target, DensityTarget::Full);
        assert_eq!(emissions[6].probe_state, ProbeStateTag::Idle);

        // The deriver keeps choosing the adopted value.
        assert_eq!(emissions[7].output.density_target, DensityTarget::Full);
        assert!(layer.state().unwrap().slow.density_preference > 0.5);
    }

    #[test]
    fn test_candidate_reverts_to_baseline_value() {
        let mut layer = started(experiment_config());
        let mut emissions = Vec::new();
        for w in 0..7 {
            // The first probing window is shaky.
            play(&layer, w, if w == 5 { 70 } else { 0 });
            emissions.push(close(&mut layer, w, Some(&ctx())));
        }

        let before = emissions[3].output.density_target;
        assert_eq!(emissions[4].output.reason, ReasonTag::ProbeActive);
        assert_ne!(emissions[4].output.density_target, before);
        assert_eq!(emissions[6].output.reason, ReasonTag::ProbeReverted);
        assert_eq!(emissions[6].output.density_target, before);
    }

    #[test]
    fn test_candidate_expiry_between_boundaries() {
        let mut layer = started(experiment_config());
        for w in 0..6 {
            play(&layer, w, if w == 5 { 70 } else { 0 });
            close(&mut layer, w, Some(&ctx()));
        }
        // Probe started at 75 s and runs for 30 s.
        assert!(layer.poll(100_000).is_none());
        let e = layer.poll(105_000).expect("revert changes density");
        assert_eq!(e.trigger, EmitTrigger::Transition);
        assert_eq!(e.output.reason, ReasonTag::ProbeReverted);
        assert_eq!(e.output.density_target, DensityTarget::Medium);
        assert_eq!(e.probe_state, ProbeStateTag::Idle);
    }

    #[test]
    fn test_teardown_reverts_running_candidate() {
        let mut layer = started(experiment_config());
        for w in 0..5 {
            play(&layer, w, 0);
            close(&mut layer, w, Some(&ctx()));
        }
        // Probing since 75 s; end the session before the next boundary.
        let end = layer.end_session(80_000, Some(&ctx())).unwrap();
        let last = end.emissions.last().expect("teardown emission");
        assert_eq!(last.trigger, EmitTrigger::Flush);
        assert_eq!(last.output.reason, ReasonTag::ProbeReverted);
        assert_eq!(last.output.density_target, DensityTarget::Medium);
    }

    #[test]
    fn test_recovered_stream_rebuilds_stability_before_arming() {
        let mut layer = started(experiment_config());
        for w in 0..3 {
            play(&layer, w, 0);
            close(&mut layer, w, Some(&ctx()));
        }
        // A long dropout, well past the interval.
        for w in 3..23 {
            let e = close(&mut layer, w, Some(&ctx()));
            assert_eq!(e.probe_state, ProbeStateTag::Idle, "window {w}");
        }
        for w in 23..26 {
            play(&layer, w, 0);
            let e = close(&mut layer, w, Some(&ctx()));
            assert_eq!(e.probe_state, ProbeStateTag::Idle, "window {w}");
        }
        play(&layer, 26, 0);
        let e = close(&mut layer, 26, Some(&ctx()));
        assert_eq!(e.probe_state, ProbeStateTag::Armed);
    }

    #[test]
    fn test_teardown_flush_stands_down_when_armed() {
        let mut layer = started(experiment_config());
        let mut last = None;
        for w in 0..4 {
            play(&layer, w, 0);
            last = Some(close(&mut layer, w, Some(&ctx())));
        }
        assert_eq!(last.unwrap().probe_state, ProbeStateTag::Armed);

        // A full partial window is still in flight at teardown.
        play(&layer, 4, 0);
        let end = layer.end_session(74_999, Some(&ctx())).unwrap();
        assert_eq!(end.emissions.len(), 1);
        let flush = &end.emissions[0];
        assert_eq!(flush.trigger, EmitTrigger::Flush);
        assert_eq!(flush.probe_state, ProbeStateTag::Idle);
        assert_ne!(flush.output.reason, ReasonTag::ProbeActive);
        assert_ne!(flush.output.reason, ReasonTag::ProbeReverted);
        assert_eq!(flush.output.density_target, DensityTarget::Medium);
    }

    #[test]
    fn test_ineligible_partial_window_is_not_flushed() {
        let mut layer = started(GrooveConfig::default());
        for w in 0..2 {
            play(&layer, w, 0);
            close(&mut layer, w, Some(&ctx()));
        }
        for i in 0..5u64 {
            let t = 30_000 + i * 750;
            layer.push_event(PerformanceEvent::new(t, EventType::NoteOnset, 0.7, 0.9));
        }
        let end = layer.end_session(40_000, Some(&ctx())).unwrap();
        assert!(end.emissions.is_empty());
        assert!(!layer.is_running());
    }

    // ========== Engine Status ==========

    #[test]
    fn test_rejecting_engine_only_changes_delivery() {
        let mut applying = started(experiment_config());
        let meta = SessionMeta::new("ada", "pedalboard", "s2");
        let mut rejecting = GrooveLayer::new(experiment_config(), meta).unwrap();
        rejecting.report_engine_status(EngineStatus::Rejecting);
        rejecting.start_session(SlowTraits::default(), 0).unwrap();

        for w in 0..6 {
            play(&applying, w, 0);
            play(&rejecting, w, 0);
            let a = close(&mut applying, w, Some(&ctx()));
            let r = close(&mut rejecting, w, Some(&ctx()));

            assert_eq!(a.delivery, Delivery::Apply, "window {w}");
            assert_eq!(r.delivery, Delivery::Advisory, "window {w}");
            assert_eq!(r.output, a.output, "window {w}");
            assert_eq!(r.probe_state, a.probe_state, "window {w}");
            assert_eq!(rejecting.state(), applying.state(), "window {w}");
            if w == 4 {
                assert_eq!(r.probe_state, ProbeStateTag::Probing);
                assert_eq!(r.output.reason, ReasonTag::ProbeActive);
            }
        }
        assert!(rejecting.degradation().unwrap().engine_rejecting);
        assert!(!rejecting.degradation().unwrap().blocks_probing());
    }

    // ========== Persistence ==========

    #[test]
    fn test_traits_round_trip_through_json_store() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Arc::new(GrooveConfig::default());
        let player = PlayerId::from("ada");

        let meta = SessionMeta::new("ada", "pedalboard", "s1");
        let store = JsonFileTraitStore::new(dir.path());
        let mut run = PlayerSession::start(cfg.clone(), meta, store, JsonLinesSink::new(Vec::new()), 0).unwrap();
        for w in 0..6 {
            for i in 0..20u64 {
                run.push(PerformanceEvent::new(w * WINDOW_MS + i * 750, EventType::NoteOnset, 0.7, 0.9));
            }
            run.boundary((w + 1) * WINDOW_MS, Some(&ctx())).unwrap();
        }
        let (mut store, sink) = run.finish(6 * WINDOW_MS, Some(&ctx())).unwrap();

        assert_eq!(sink.written(), 6);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        for line in out.lines() {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["schema_id"], "groove_layer_control");
        }

        let saved = store.load_trait_state(&player).unwrap().expect("traits saved");
        assert!(saved.timing_stability > 0.5);
        assert!(dir.path().join("ada.json").exists());

        // The next session starts from what was saved.
        let meta = SessionMeta::new("ada", "pedalboard", "s2");
        let run = PlayerSession::start(cfg, meta, store, Vec::new(), 0).unwrap();
        assert_eq!(run.layer().state().unwrap().slow, saved);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "window": {{ "duration_ms": 10000 }} }}"#).unwrap();
        let cfg = GrooveConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.window.duration_ms, 10_000);
        assert_eq!(cfg.probe.interval_ms, GrooveConfig::default().probe.interval_ms);

        let layer = started(cfg);
        assert_eq!(layer.window_end_ms(), Some(10_000));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{ "learning": {{ "alpha_fast": 1.5 }} }}"#).unwrap();
        assert!(GrooveConfig::from_json_file(bad.path()).is_err());
    }

    // ========== Bounds ==========

    #[test]
    fn test_state_and_confidence_stay_in_unit_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut layer = started(GrooveConfig::default());

        for w in 0..60u64 {
            let start = w * WINDOW_MS;
            let n = rng.gen_range(0..40);
            let mut times: Vec<u64> = (0..n).map(|_| rng.gen_range(start..start + WINDOW_MS)).collect();
            times.sort_unstable();
            for t in times {
                let strength = rng.gen_range(-0.5..1.5);
                let confidence = rng.gen_range(-0.5..1.5);
                layer.push_event(PerformanceEvent::new(t, EventType::PercussiveOnset, strength, confidence));
            }
            let context = rng.gen_bool(0.8).then(ctx);
            let e = close(&mut layer, w, context.as_ref());

            assert!((0.0..=1.0).contains(&e.output.window_confidence));
            let state = layer.state().unwrap();
            for v in [state.fast, state.slow] {
                for x in [
                    v.timing_stability,
                    v.tempo_adherence,
                    v.dynamic_consistency,
                    v.fatigue_resilience,
                    v.cognitive_load,
                    v.adaptation_speed,
                    v.density_preference,
                    v.exploration_appetite,
                ] {
                    assert!((0.0..=1.0).contains(&x), "window {w}: {x}");
                }
            }
        }
    }
}
