use chrono::{DateTime, TimeZone, Utc};
use course_enroll::core::{Course, CourseId, EnrollmentStore, MeetingInterval, StudentId};
use course_enroll::{AdmissionCoordinator, EnrollError, InMemoryCatalog, InMemoryEnrollmentStore};
use std::sync::Arc;

type Coordinator = AdmissionCoordinator<InMemoryCatalog, InMemoryEnrollmentStore>;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, hour, minute, 0).unwrap()
}

fn meeting(start: (u32, u32), end: (u32, u32)) -> MeetingInterval {
    MeetingInterval::new(at(start.0, start.1), at(end.0, end.1))
}

fn course(id: u64, capacity: u32, meetings: Vec<MeetingInterval>) -> Course {
    Course {
        id: CourseId(id),
        name: format!("Course {}", id),
        location: "Main hall".to_string(),
        capacity,
        meetings,
    }
}

fn coordinator(courses: Vec<Course>) -> Coordinator {
    AdmissionCoordinator::with_store(
        Arc::new(InMemoryCatalog::new(courses)),
        Arc::new(InMemoryEnrollmentStore::new()),
    )
}

async fn occupied(coordinator: &Coordinator, course: u64) -> u32 {
    coordinator
        .seat_count(CourseId(course))
        .unwrap()
        .map(|s| s.occupied)
        .unwrap_or(0)
}

#[tokio::test]
async fn test_enroll_twice_is_already_enrolled() {
    let coordinator = coordinator(vec![course(1, 10, vec![meeting((10, 0), (11, 0))])]);
    let alice = StudentId::from("alice");

    let enrollment = coordinator.enroll(&alice, CourseId(1)).await.unwrap();
    assert_eq!(enrollment.student, alice);
    assert_eq!(enrollment.course, CourseId(1));

    let err = coordinator.enroll(&alice, CourseId(1)).await.unwrap_err();
    assert!(matches!(err, EnrollError::AlreadyEnrolled { .. }));
    assert_eq!(occupied(&coordinator, 1).await, 1);
}

#[tokio::test]
async fn test_overlapping_course_is_schedule_conflict() {
    let coordinator = coordinator(vec![
        course(1, 10, vec![meeting((10, 0), (11, 0))]),
        course(2, 10, vec![meeting((10, 30), (11, 30))]),
    ]);
    let alice = StudentId::from("alice");

    coordinator.enroll(&alice, CourseId(1)).await.unwrap();
    let err = coordinator.enroll(&alice, CourseId(2)).await.unwrap_err();

    match err {
        EnrollError::ScheduleConflict {
            course, conflicting, ..
        } => {
            assert_eq!(course, CourseId(2));
            assert_eq!(conflicting, CourseId(1));
        }
        other => panic!("expected schedule conflict, got {:?}", other),
    }
    // A rejected conflict never touches the seat.
    assert_eq!(occupied(&coordinator, 2).await, 0);
}

#[tokio::test]
async fn test_touching_meetings_do_not_conflict() {
    let coordinator = coordinator(vec![
        course(1, 10, vec![meeting((10, 0), (11, 0))]),
        course(2, 10, vec![meeting((11, 0), (12, 0))]),
    ]);
    let alice = StudentId::from("alice");

    coordinator.enroll(&alice, CourseId(1)).await.unwrap();
    coordinator.enroll(&alice, CourseId(2)).await.unwrap();

    assert_eq!(coordinator.schedule(&alice).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_full_course_rejects_next_student() {
    let coordinator = coordinator(vec![course(1, 2, vec![])]);

    coordinator.enroll(&StudentId::from("a"), CourseId(1)).await.unwrap();
    coordinator.enroll(&StudentId::from("b"), CourseId(1)).await.unwrap();
    let err = coordinator
        .enroll(&StudentId::from("c"), CourseId(1))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::CourseFull(CourseId(1))));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unknown_course_is_not_found() {
    let coordinator = coordinator(vec![]);
    let err = coordinator
        .enroll(&StudentId::from("alice"), CourseId(404))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollError::CourseNotFound(CourseId(404))));
}

#[tokio::test]
async fn test_withdraw_restores_seats_and_schedule() {
    let coordinator = coordinator(vec![
        course(1, 3, vec![meeting((9, 0), (10, 0))]),
        course(2, 3, vec![meeting((13, 0), (14, 0)), meeting((15, 0), (16, 0))]),
    ]);
    let alice = StudentId::from("alice");
    coordinator.enroll(&alice, CourseId(1)).await.unwrap();

    let seats_before = coordinator.seat_count(CourseId(2)).unwrap();
    let schedule_before = coordinator.schedule(&alice).await.unwrap();

    coordinator.enroll(&alice, CourseId(2)).await.unwrap();
    coordinator.withdraw(&alice, CourseId(2)).await.unwrap();

    assert_eq!(occupied(&coordinator, 2).await, seats_before.map(|s| s.occupied).unwrap_or(0));
    assert_eq!(coordinator.schedule(&alice).await.unwrap(), schedule_before);

    // The freed time slot can be taken again.
    coordinator.enroll(&alice, CourseId(2)).await.unwrap();
}

#[tokio::test]
async fn test_withdraw_without_enrollment_is_not_enrolled() {
    let coordinator = coordinator(vec![course(1, 3, vec![])]);
    let err = coordinator
        .withdraw(&StudentId::from("alice"), CourseId(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollError::NotEnrolled { .. }));
}

#[tokio::test]
async fn test_withdraw_after_course_removed_clears_schedule() {
    let coordinator = coordinator(vec![
        course(1, 3, vec![meeting((10, 0), (11, 0))]),
        course(2, 3, vec![meeting((10, 0), (11, 0))]),
    ]);
    let alice = StudentId::from("alice");
    coordinator.enroll(&alice, CourseId(1)).await.unwrap();

    coordinator.catalog().remove(CourseId(1));
    coordinator.withdraw(&alice, CourseId(1)).await.unwrap();

    assert!(coordinator.schedule(&alice).await.unwrap().is_empty());
    // The slot used by the removed course is free again.
    coordinator.enroll(&alice, CourseId(2)).await.unwrap();
}

#[tokio::test]
async fn test_schedule_lists_meetings_and_names() {
    let coordinator = coordinator(vec![course(
        7,
        5,
        vec![meeting((8, 0), (9, 30)), meeting((14, 0), (15, 30))],
    )]);
    let alice = StudentId::from("alice");
    coordinator.enroll(&alice, CourseId(7)).await.unwrap();

    let schedule = coordinator.schedule(&alice).await.unwrap();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].name.as_deref(), Some("Course 7"));
    assert_eq!(schedule[0].meetings.len(), 2);
}

#[tokio::test]
async fn test_capacity_change_is_bounded_by_occupancy() {
    let coordinator = coordinator(vec![course(1, 2, vec![])]);
    coordinator.enroll(&StudentId::from("a"), CourseId(1)).await.unwrap();
    coordinator.enroll(&StudentId::from("b"), CourseId(1)).await.unwrap();

    let err = coordinator.update_capacity(CourseId(1), 1).await.unwrap_err();
    assert!(matches!(err, EnrollError::CapacityBelowOccupancy { occupied: 2, .. }));

    let seats = coordinator.update_capacity(CourseId(1), 3).await.unwrap();
    assert_eq!(seats.capacity, 3);
    coordinator.catalog().set_capacity(CourseId(1), 3).unwrap();
    coordinator.enroll(&StudentId::from("c"), CourseId(1)).await.unwrap();
    assert_eq!(occupied(&coordinator, 1).await, 3);
}

#[tokio::test]
async fn test_seat_count_matches_roster_after_mixed_sequence() {
    let coordinator = coordinator(vec![
        course(1, 3, vec![meeting((9, 0), (10, 0))]),
        course(2, 2, vec![meeting((9, 30), (10, 30))]),
        course(3, 4, vec![meeting((12, 0), (13, 0))]),
    ]);
    let students: Vec<StudentId> = (0..6).map(|i| StudentId(format!("s{}", i))).collect();

    for (i, student) in students.iter().enumerate() {
        let _ = coordinator.enroll(student, CourseId(1 + (i as u64 % 2))).await;
        let _ = coordinator.enroll(student, CourseId(2)).await;
        let _ = coordinator.enroll(student, CourseId(3)).await;
        if i % 3 == 0 {
            let _ = coordinator.withdraw(student, CourseId(3)).await;
        }
    }

    for id in 1..=3 {
        let roster = coordinator.roster(CourseId(id)).await.unwrap();
        assert_eq!(occupied(&coordinator, id).await as usize, roster.len());
    }
    for student in &students {
        let schedule = coordinator.schedule(student).await.unwrap();
        let meetings: Vec<_> = schedule.iter().flat_map(|c| c.meetings.clone()).collect();
        for (i, a) in meetings.iter().enumerate() {
            for b in &meetings[i + 1..] {
                assert!(!a.overlaps(b), "{} has overlapping meetings", student);
            }
        }
        let stored = coordinator.store().list_by_student(student).await.unwrap();
        assert_eq!(stored.len(), schedule.len());
    }
}
