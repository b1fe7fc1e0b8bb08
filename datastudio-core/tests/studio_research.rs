use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use polars::prelude::*;

use datastudio_core::config::{ResearchSpec, StudentConfiguration};
use datastudio_core::error::Error;
use datastudio_core::filter::{FilterSpec, Predicate};
use datastudio_core::research::{Attrs, ResearchNode};
use datastudio_core::student::{BasicStudent, Student};
use datastudio_core::studio::{ResearchListener, Studio};

fn counting_student(
    student_name: &str,
    research_name: &str,
    counter: Arc<AtomicUsize>,
) -> Arc<dyn Student> {
    let configuration =
        StudentConfiguration::new(student_name).with_research(research_name, ResearchSpec::new());
    let student =
        BasicStudent::new(configuration).with_handler(research_name, move |_, _, name, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ResearchNode::named_frame(
                name,
                df!("value" => &[1i64, 2]).unwrap(),
            ))
        });
    Arc::new(student)
}

struct CountingListener {
    calls: Arc<AtomicUsize>,
}

impl ResearchListener for CountingListener {
    fn research_finished(&self, _studio: &Studio, _name: &str, _attrs: &Attrs) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingListener;

impl ResearchListener for FailingListener {
    fn research_finished(&self, _studio: &Studio, name: &str, _attrs: &Attrs) -> Result<(), Error> {
        Err(Error::general_error(format!(
            "Postprocessing of '{}' failed",
            name
        )))
    }
}

#[test]
fn test_research_is_cached() {
    let studio = Studio::new();
    let counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "r1", counter.clone()), &Attrs::new())
        .unwrap();

    let first = studio.research("r1", &Attrs::new()).unwrap();
    let second = studio.research("r1", &Attrs::new()).unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(studio.check_research_ready("r1"));
    let a = first.get("r1").unwrap().expect_frame().unwrap();
    let b = second.get("r1").unwrap().expect_frame().unwrap();
    assert!(a.equals(b));
}

#[test]
fn test_update_recomputes() {
    let studio = Studio::new();
    let counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "r1", counter.clone()), &Attrs::new())
        .unwrap();

    studio.research("r1", &Attrs::new()).unwrap();
    studio
        .research_opt("r1", None, true, &Attrs::new())
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_first_registered_student_produces() {
    let studio = Studio::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "shared", first.clone()), &Attrs::new())
        .unwrap();
    studio
        .add_student(
            counting_student("s2", "shared", second.clone()),
            &Attrs::new(),
        )
        .unwrap();

    studio.research("shared", &Attrs::new()).unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn test_named_student_dispatch() {
    let studio = Studio::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "shared", first.clone()), &Attrs::new())
        .unwrap();
    studio
        .add_student(
            counting_student("s2", "shared", second.clone()),
            &Attrs::new(),
        )
        .unwrap();

    studio
        .research_opt("shared", Some("s2"), true, &Attrs::new())
        .unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    let err = studio
        .research_opt("shared", Some("absent"), true, &Attrs::new())
        .unwrap_err();
    assert!(err.is_research_not_found());
    assert_eq!(err.student, Some("absent".to_string()));

    // A student asked by name for a research it has no handler for fails,
    // and the failure names both the research and the student.
    let err = studio
        .research_opt("other", Some("s1"), true, &Attrs::new())
        .unwrap_err();
    assert!(err.is_research_not_found());
    assert!(err.message.contains("other"));
    assert!(err.message.contains("s1"));
}

#[test]
fn test_no_student_provides() {
    let studio = Studio::new();
    let err = studio.research("unknown", &Attrs::new()).unwrap_err();
    assert!(err.is_research_not_found());
    assert_eq!(err.research, Some("unknown".to_string()));
}

#[test]
fn test_prerequisites_resolve_before_handler() {
    let studio = Studio::new();
    let source_counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(
            counting_student("origin", "source", source_counter.clone()),
            &Attrs::new(),
        )
        .unwrap();

    let configuration = StudentConfiguration::new("worker").with_research(
        "derived",
        ResearchSpec::new().with_input_researches(vec!["source".to_string()]),
    );
    let worker =
        BasicStudent::new(configuration).with_handler("derived", |_, studio, name, _| {
            // The prerequisite is in the knowledge cache by the time the
            // handler runs.
            assert!(studio.check_research_ready("source"));
            let source = studio
                .knowledge("source")
                .ok_or_else(|| Error::general_error("source missing".to_string()))?;
            let frame = source.get("source").and_then(ResearchNode::as_frame).ok_or_else(
                || Error::general_error("source frame missing".to_string()),
            )?;
            Ok(ResearchNode::named_frame(name, frame.as_ref().clone()))
        });
    studio
        .add_student(Arc::new(worker), &Attrs::new())
        .unwrap();

    studio.research("derived", &Attrs::new()).unwrap();
    assert_eq!(source_counter.load(Ordering::SeqCst), 1);
    // The prerequisite was cached, so requesting it again is free.
    studio.research("source", &Attrs::new()).unwrap();
    assert_eq!(source_counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_all_prerequisites_resolve_before_handler() {
    let studio = Studio::new();
    let first_counter = Arc::new(AtomicUsize::new(0));
    let second_counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(
            counting_student("origin1", "source1", first_counter.clone()),
            &Attrs::new(),
        )
        .unwrap();
    studio
        .add_student(
            counting_student("origin2", "source2", second_counter.clone()),
            &Attrs::new(),
        )
        .unwrap();

    let configuration = StudentConfiguration::new("worker").with_research(
        "derived",
        ResearchSpec::new()
            .with_input_researches(vec!["source1".to_string(), "source2".to_string()]),
    );
    let worker = BasicStudent::new(configuration).with_handler("derived", |_, studio, name, _| {
        // Every declared prerequisite is in the knowledge cache, not just
        // the first one.
        assert!(studio.check_research_ready("source1"));
        assert!(studio.check_research_ready("source2"));
        Ok(ResearchNode::named_frame(
            name,
            df!("value" => &[1i64]).unwrap(),
        ))
    });
    studio
        .add_student(Arc::new(worker), &Attrs::new())
        .unwrap();

    studio.research("derived", &Attrs::new()).unwrap();
    assert_eq!(first_counter.load(Ordering::SeqCst), 1);
    assert_eq!(second_counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_initial_research_runs_once_on_join() {
    let studio = Studio::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let configuration = StudentConfiguration::new("eager")
        .with_research("warmup", ResearchSpec::new().with_initial(true));
    let handler_counter = counter.clone();
    let student =
        BasicStudent::new(configuration).with_handler("warmup", move |_, _, name, _| {
            handler_counter.fetch_add(1, Ordering::SeqCst);
            Ok(ResearchNode::named_frame(
                name,
                df!("value" => &[0i64]).unwrap(),
            ))
        });
    studio
        .add_student(Arc::new(student), &Attrs::new())
        .unwrap();

    assert!(studio.check_research_ready("warmup"));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    studio.research("warmup", &Attrs::new()).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_duplicate_student_is_rejected() {
    let studio = Studio::new();
    let counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "r1", counter.clone()), &Attrs::new())
        .unwrap();
    let err = studio
        .add_student(counting_student("s1", "r2", counter), &Attrs::new())
        .unwrap_err();
    assert_eq!(err.student, Some("s1".to_string()));
    assert_eq!(studio.student_names(), vec!["s1".to_string()]);
}

#[test]
fn test_check_research_provided() {
    let studio = Studio::new();
    assert!(!studio.check_research_provided("r1"));
    let counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "r1", counter.clone()), &Attrs::new())
        .unwrap();
    assert!(studio.check_research_provided("r1"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    // A cached research counts as provided even without a producer.
    studio.add_studio_research("inserted", ResearchNode::frame(df!("a" => &[1i64]).unwrap()));
    assert!(studio.check_research_provided("inserted"));
}

#[test]
fn test_listener_called_once_and_duplicates_warn() {
    let studio = Studio::new();
    let counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "r1", counter), &Attrs::new())
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let listener: Arc<dyn ResearchListener> = Arc::new(CountingListener {
        calls: calls.clone(),
    });
    studio.add_research_listener("r1", listener.clone());
    // The second registration of the same listener is ignored.
    studio.add_research_listener("r1", listener.clone());

    studio.research("r1", &Attrs::new()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Cached requests do not notify again.
    studio.research("r1", &Attrs::new()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    studio.remove_research_listener("r1", &listener);
    studio
        .research_opt("r1", None, true, &Attrs::new())
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_listener_error_propagates() {
    let studio = Studio::new();
    let counter = Arc::new(AtomicUsize::new(0));
    studio
        .add_student(counting_student("s1", "r1", counter), &Attrs::new())
        .unwrap();
    studio.add_research_listener("r1", Arc::new(FailingListener));

    let err = studio.research("r1", &Attrs::new()).unwrap_err();
    assert!(err.message.contains("Postprocessing"));
    // The research itself was produced and cached before the listener ran.
    assert!(studio.check_research_ready("r1"));
}

#[test]
fn test_add_research_notifies_and_add_studio_research_does_not() {
    let studio = Studio::new();
    let calls = Arc::new(AtomicUsize::new(0));
    studio.add_research_listener(
        "direct",
        Arc::new(CountingListener {
            calls: calls.clone(),
        }),
    );

    studio.add_studio_research(
        "direct",
        ResearchNode::frame(df!("a" => &[1i64]).unwrap()),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    studio
        .add_research(
            "direct",
            ResearchNode::frame(df!("a" => &[2i64]).unwrap()),
            &Attrs::new(),
        )
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_output_filter_applies_to_named_frame() {
    let studio = Studio::new();
    let configuration = StudentConfiguration::new("curator").with_research(
        "curated",
        ResearchSpec::new().with_output_filter(FilterSpec::And(vec![(
            "kind".to_string(),
            Predicate::Text("good".to_string()),
        )])),
    );
    let student = BasicStudent::new(configuration).with_handler("curated", |_, _, name, _| {
        Ok(ResearchNode::named_frame(
            name,
            df!("kind" => &["good", "bad", "good"]).unwrap(),
        ))
    });
    studio
        .add_student(Arc::new(student), &Attrs::new())
        .unwrap();

    let research = studio.research("curated", &Attrs::new()).unwrap();
    let frame = research.get("curated").unwrap().expect_frame().unwrap();
    assert_eq!(frame.height(), 2);
}
