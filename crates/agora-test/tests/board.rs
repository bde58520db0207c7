//! Whiteboard replication: stroke fidelity and late-joiner replay

use std::time::Duration;

use agora_core::{ActorId, Role, StrokeId, StrokeKey, Vec3};
use agora_runtime::ClientEvent;
use agora_test::{ChaosConfig, ChaosLink, Classroom, FRAME};
use agora_transport::HubConfig;

fn point(i: u32) -> Vec3 {
    Vec3::new(i as f32 * 0.01, (i % 7) as f32 * 0.01, 0.0)
}

/// begin, `points - 1` continues one frame apart, end
fn draw(class: &mut Classroom, owner: ActorId, color: u8, points: u32) -> StrokeId {
    let stroke = class[owner].begin_stroke(color, point(0)).unwrap();
    class.step().unwrap();
    for i in 1..points {
        assert!(class[owner].continue_stroke(stroke, point(i)).unwrap());
        class.step().unwrap();
    }
    assert!(class[owner].end_stroke(stroke).unwrap());
    stroke
}

fn points_at(class: &Classroom, viewer: ActorId, key: StrokeKey) -> Option<Vec<Vec3>> {
    class[viewer].board().stroke(key).map(|s| s.points.clone())
}

fn chaotic_class(config: ChaosConfig, seed: u64) -> (Classroom, [ActorId; 3]) {
    let link = ChaosLink::new(config, seed, FRAME);
    let mut class = Classroom::with_conditioner("Classroom_1234", HubConfig::default(), link);
    let teacher = class.join("teacher", Role::Instructor).unwrap();
    let ana = class.join("ana", Role::Student).unwrap();
    let ben = class.join("ben", Role::Student).unwrap();
    class.run_for(Duration::from_secs(2)).unwrap();
    (class, [teacher, ana, ben])
}

fn assert_fidelity(config: ChaosConfig, seed: u64, settle: Duration) {
    let (mut class, [teacher, ana, ben]) = chaotic_class(config, seed);
    let first = draw(&mut class, ana, 2, 40);
    let second = draw(&mut class, teacher, 0, 25);
    class.run_for(settle).unwrap();

    for key in [StrokeKey::new(ana, first), StrokeKey::new(teacher, second)] {
        let local = points_at(&class, key.owner, key).unwrap();
        assert_eq!(local.len() as u32, if key.owner == ana { 40 } else { 25 });
        for viewer in [teacher, ana, ben] {
            let stroke = class[viewer].board().stroke(key).cloned();
            let stroke = stroke.unwrap_or_else(|| panic!("{viewer} is missing {key}"));
            assert_eq!(stroke.points, local, "{viewer} diverged on {key}");
            assert!(!stroke.is_open);
        }
    }
}

#[test]
fn test_stroke_fidelity_on_good_network() {
    assert_fidelity(ChaosConfig::good(), 1, Duration::from_secs(2));
}

#[test]
fn test_stroke_fidelity_on_poor_network() {
    assert_fidelity(ChaosConfig::poor(), 2, Duration::from_secs(6));
}

#[test]
fn test_stroke_fidelity_on_hostile_network() {
    assert_fidelity(ChaosConfig::hostile(), 3, Duration::from_secs(15));
}

#[test]
fn test_late_joiner_replays_strokes_in_order() {
    let mut class = Classroom::new("Classroom_1234");
    let teacher = class.join("teacher", Role::Instructor).unwrap();
    let ana = class.join("ana", Role::Student).unwrap();
    class.run_for(Duration::from_millis(200)).unwrap();

    let s1 = draw(&mut class, ana, 1, 12);
    let s2 = draw(&mut class, ana, 3, 8);
    class.run_for(Duration::from_millis(200)).unwrap();

    let carl = class.join("carl", Role::Student).unwrap();
    class.run_for(Duration::from_secs(1)).unwrap();

    let expected: Vec<(StrokeKey, Vec<Vec3>)> = class[ana]
        .board()
        .strokes()
        .iter()
        .map(|s| (s.key, s.points.clone()))
        .collect();
    let replayed: Vec<(StrokeKey, Vec<Vec3>)> = class[carl]
        .board()
        .strokes()
        .iter()
        .map(|s| (s.key, s.points.clone()))
        .collect();
    assert_eq!(
        replayed.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
        vec![StrokeKey::new(ana, s1), StrokeKey::new(ana, s2)]
    );
    assert_eq!(replayed, expected);
    assert_eq!(replayed[0].1.len(), 12);
    assert_eq!(replayed[1].1.len(), 8);
    assert_eq!(class[carl].board().stroke(StrokeKey::new(ana, s2)).map(|s| s.color_index), Some(3));

    let events = class.take_events(carl);
    assert!(events.contains(&ClientEvent::Synced));
    assert!(!class[carl].is_syncing());
    let _ = teacher;
}

#[test]
fn test_late_joiner_under_chaos() {
    let (mut class, [_, ana, _]) = chaotic_class(ChaosConfig::poor(), 9);
    let s1 = draw(&mut class, ana, 1, 20);
    let s2 = draw(&mut class, ana, 2, 20);
    class.run_for(Duration::from_secs(1)).unwrap();

    let dana = class.join("dana", Role::Student).unwrap();
    class.run_for(Duration::from_secs(8)).unwrap();

    let keys: Vec<StrokeKey> = class[dana].board().strokes().iter().map(|s| s.key).collect();
    assert_eq!(keys, vec![StrokeKey::new(ana, s1), StrokeKey::new(ana, s2)]);
    for key in keys {
        assert_eq!(points_at(&class, dana, key), points_at(&class, ana, key));
    }
}

#[test]
fn test_stroke_drawn_during_catch_up_lands_after_history() {
    let mut class = Classroom::new("Classroom_1234");
    let _teacher = class.join("teacher", Role::Instructor).unwrap();
    let ana = class.join("ana", Role::Student).unwrap();
    class.run_for(Duration::from_millis(200)).unwrap();
    let s1 = draw(&mut class, ana, 0, 5);

    // Joins and immediately sees a new stroke start
    let carl = class.join("carl", Role::Student).unwrap();
    let s2 = draw(&mut class, ana, 0, 5);
    class.run_for(Duration::from_secs(1)).unwrap();

    let keys: Vec<StrokeKey> = class[carl].board().strokes().iter().map(|s| s.key).collect();
    assert_eq!(keys, vec![StrokeKey::new(ana, s1), StrokeKey::new(ana, s2)]);
    assert_eq!(
        points_at(&class, carl, StrokeKey::new(ana, s2)).map(|p| p.len()),
        Some(5)
    );
}

#[test]
fn test_clear_removes_seen_strokes_everywhere() {
    let mut class = Classroom::new("Classroom_1234");
    let teacher = class.join("teacher", Role::Instructor).unwrap();
    let ana = class.join("ana", Role::Student).unwrap();
    class.run_for(Duration::from_millis(200)).unwrap();

    draw(&mut class, ana, 0, 4);
    draw(&mut class, teacher, 1, 4);
    class.run_for(Duration::from_millis(200)).unwrap();
    assert_eq!(class[ana].board().len(), 2);

    class[teacher].clear_board().unwrap();
    class.run_for(Duration::from_millis(200)).unwrap();
    assert!(class[ana].board().is_empty());
    assert!(class[teacher].board().is_empty());

    // Cleared history is not replayed to newcomers
    let carl = class.join("carl", Role::Student).unwrap();
    class.run_for(Duration::from_secs(1)).unwrap();
    assert!(class[carl].board().is_empty());

    // Ids keep counting after a clear
    let next = draw(&mut class, ana, 0, 2);
    assert_eq!(next, StrokeId(2));
}
