//! A full lesson: mute, failover, drawing and engagement in one room

use std::time::Duration;

use agora_core::{ActorId, Role, SessionTime, StrokeId, StrokeKey, Vec3};
use agora_runtime::ClientEvent;
use agora_test::Classroom;
use agora_wire::Command;

#[test]
fn test_lesson_with_instructor_dropout() {
    let mut class = Classroom::new("Classroom_1234");
    let teacher = class.join("teacher", Role::Instructor).unwrap();
    let ana = class.join("ana", Role::Student).unwrap();
    let ben = class.join("ben", Role::Student).unwrap();
    assert_eq!((teacher, ana, ben), (ActorId(1), ActorId(2), ActorId(3)));
    class.run_for(Duration::from_millis(300)).unwrap();
    for (_, view) in class.authority_views() {
        assert_eq!(view, Some(teacher));
    }

    class[teacher].issue(Command::MuteAll { muted: true }).unwrap();
    class.run_for(Duration::from_millis(200)).unwrap();

    // The instructor drops; the next-lowest member takes over
    class.disconnect(teacher).unwrap();
    class.step().unwrap();
    assert_eq!(class[ana].authority(), Some(ana));
    assert_eq!(class[ben].authority(), Some(ana));
    assert!(class[ana].effective_muted());
    assert!(class[ben].effective_muted());
    assert!(class
        .take_events(ben)
        .contains(&ClientEvent::AuthorityChanged {
            previous: Some(teacher),
            current: Some(ana),
        }));

    // Six quick dots, then the stroke under test
    for _ in 0..6 {
        let dot = class[ana].begin_stroke(0, Vec3::new(1.0, 1.0, 0.0)).unwrap();
        class[ana].end_stroke(dot).unwrap();
    }
    let stroke = class[ana].begin_stroke(0, Vec3::ZERO).unwrap();
    assert_eq!(stroke, StrokeId(7));
    class.step().unwrap();
    class[ana].continue_stroke(stroke, Vec3::new(0.02, 0.0, 0.0)).unwrap();
    class[ana].end_stroke(stroke).unwrap();
    class.run_for(Duration::from_millis(200)).unwrap();

    let key = StrokeKey::new(ana, stroke);
    let drawn = class[ben].board().stroke(key).cloned().unwrap();
    assert_eq!(drawn.points, vec![Vec3::ZERO, Vec3::new(0.02, 0.0, 0.0)]);
    assert_eq!(drawn.color_index, 0);
    assert!(!drawn.is_open);
    assert_eq!(class[ana].board().stroke(key).map(|s| s.points.clone()), Some(drawn.points));

    // Ben looks away at ten seconds
    class.run_until(SessionTime::from_secs(10)).unwrap();
    class[ben].set_focused(false).unwrap();
    class.run_until(SessionTime::from_secs(21)).unwrap();

    assert_eq!(class[ana].flagged_members(), vec![ben]);
    let latest = class[ana].aggregator().member(ben).and_then(|m| m.latest()).unwrap();
    assert!(!latest.is_focused);
    assert!(latest.score < 100.0);
    assert!(class
        .take_events(ana)
        .iter()
        .any(|e| matches!(e, ClientEvent::MemberFlagged { actor, .. } if *actor == ben)));

    // The dropped instructor timed out long ago
    assert!(!class[ana].room().contains(teacher));
    assert_eq!(class[ben].authority(), Some(ana));
}

#[test]
fn test_kicked_student_is_gone_for_everyone() {
    let mut class = Classroom::new("Classroom_1234");
    let teacher = class.join("teacher", Role::Instructor).unwrap();
    let ana = class.join("ana", Role::Student).unwrap();
    let ben = class.join("ben", Role::Student).unwrap();
    class.run_for(Duration::from_millis(300)).unwrap();

    class[teacher].issue(Command::Kick { target: ben }).unwrap();
    class.run_for(Duration::from_millis(100)).unwrap();

    assert!(class.take_events(ben).contains(&ClientEvent::Kicked));
    assert!(!class[ben].is_active());
    assert_eq!(class.running(), vec![teacher, ana]);
    assert!(!class[ana].room().contains(ben));
    assert!(class[ben].begin_stroke(0, Vec3::ZERO).is_err());
}

#[test]
fn test_environment_and_material_access_reach_everyone() {
    let mut class = Classroom::new("Classroom_1234");
    let teacher = class.join("teacher", Role::Instructor).unwrap();
    let ana = class.join("ana", Role::Student).unwrap();
    class.run_for(Duration::from_millis(200)).unwrap();

    class[teacher]
        .issue(Command::ChangeEnvironment { name: "Lab".into() })
        .unwrap();
    class[teacher]
        .issue(Command::SetMaterialAccess { granted: true })
        .unwrap();
    class.run_for(Duration::from_millis(100)).unwrap();

    for actor in [teacher, ana] {
        let controls = class[actor].controls();
        assert_eq!(controls.environment.as_deref(), Some("Lab"));
        assert!(controls.material_access);
    }
}
