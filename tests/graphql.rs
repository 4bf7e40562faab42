use std::sync::Arc;

use async_graphql::{value, Name, Request, Response, Value};
use office_hours::config::CapacityLimits;
use office_hours::db::memory::MemoryStore;
use office_hours::graphql::guards::Caller;
use office_hours::graphql::{build_schema, OfficeHoursSchema};
use office_hours::scheduler::Scheduler;

const STAFF: Caller = Caller {
    user_id: 7,
    is_admin: false,
};
const STUDENT: Caller = Caller {
    user_id: 42,
    is_admin: false,
};

fn schema() -> OfficeHoursSchema {
    build_schema(Scheduler::new(
        Arc::new(MemoryStore::new()),
        CapacityLimits::default(),
    ))
}

async fn run(schema: &OfficeHoursSchema, caller: Option<Caller>, query: &str) -> Response {
    let request = Request::new(query);
    let request = match caller {
        Some(caller) => request.data(caller),
        None => request,
    };

    schema.execute(request).await
}

fn error_code(response: &Response) -> Option<Value> {
    response
        .errors
        .first()
        .and_then(|error| error.extensions.as_ref())
        .and_then(|extensions| extensions.get("code"))
        .cloned()
}

fn field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |value, key| match value {
        Value::Object(fields) => fields.get(*key),
        _ => None,
    })
}

const CREATE_HOURS: &str = r#"
    mutation {
        createTemplate(staffId: 7, template: {
            dayOfWeek: 1, startTime: "09:00", endTime: "12:00", maxRegularCapacity: 40
        }) {
            startTime
            endTime
            maxRegularCapacity
        }
    }
"#;

const BOOK_TEN: &str = r#"
    mutation {
        createAppointment(appointment: {
            appointeeId: 7, appointmentDate: "2024-01-01",
            startTime: "10:00", endTime: "10:30", reason: "Office hours"
        }) {
            id
            status
            appointmentTime
        }
    }
"#;

#[test_log::test(tokio::test)]
async fn anonymous_callers_are_turned_away() {
    let schema = schema();
    let response = run(&schema, None, CREATE_HOURS).await;

    assert_eq!(error_code(&response), Some(Value::from("UNAUTHENTICATED")));
}

#[test_log::test(tokio::test)]
async fn staff_create_their_own_hours() {
    let schema = schema();
    let response = run(&schema, Some(STAFF), CREATE_HOURS).await;

    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data,
        value!({
            "createTemplate": {
                "startTime": "09:00:00",
                "endTime": "12:00:00",
                "maxRegularCapacity": 10
            }
        })
    );
}

#[test_log::test(tokio::test)]
async fn nobody_else_edits_a_staff_members_hours() {
    let schema = schema();
    let response = run(&schema, Some(STUDENT), CREATE_HOURS).await;

    assert_eq!(
        error_code(&response),
        Some(Value::from("NOT_FOUND_OR_UNAUTHORIZED"))
    );
}

#[test_log::test(tokio::test)]
async fn double_booking_reports_slot_unavailable() {
    let schema = schema();
    run(&schema, Some(STAFF), CREATE_HOURS).await;

    let first = run(&schema, Some(STUDENT), BOOK_TEN).await;
    assert!(first.errors.is_empty(), "{:?}", first.errors);

    let second = run(&schema, Some(STUDENT), BOOK_TEN).await;
    assert_eq!(error_code(&second), Some(Value::from("SLOT_UNAVAILABLE")));
}

#[test_log::test(tokio::test)]
async fn only_the_staff_member_answers_a_request() {
    let schema = schema();
    run(&schema, Some(STAFF), CREATE_HOURS).await;
    run(&schema, Some(STUDENT), BOOK_TEN).await;

    let accept = r#"
        mutation {
            transitionAppointment(id: 2, status: ACCEPTED) { status }
        }
    "#;
    let by_student = run(&schema, Some(STUDENT), accept).await;
    assert_eq!(
        error_code(&by_student),
        Some(Value::from("NOT_FOUND_OR_UNAUTHORIZED"))
    );

    let by_staff = run(&schema, Some(STAFF), accept).await;
    assert!(by_staff.errors.is_empty(), "{:?}", by_staff.errors);
    assert_eq!(
        field(&by_staff.data, &["transitionAppointment", "status"]),
        Some(&Value::Enum(Name::new("ACCEPTED")))
    );

    let reopen = r#"
        mutation {
            transitionAppointment(id: 2, status: PENDING) { status }
        }
    "#;
    let response = run(&schema, Some(STAFF), reopen).await;
    assert_eq!(error_code(&response), Some(Value::from("INVALID_TRANSITION")));
}

#[test_log::test(tokio::test)]
async fn availability_reflects_exceptions() {
    let schema = schema();
    run(&schema, Some(STAFF), CREATE_HOURS).await;
    run(
        &schema,
        Some(STAFF),
        r#"
            mutation {
                createException(staffId: 7, exception: {
                    exceptionDate: "2024-01-01", exceptionType: UNAVAILABLE,
                    startTime: "09:00", endTime: "10:00", reason: "Dentist"
                }) { id }
            }
        "#,
    )
    .await;

    let response = run(
        &schema,
        Some(STUDENT),
        r#"
            {
                availability(staffId: 7, date: "2024-01-01") {
                    range { start end }
                }
            }
        "#,
    )
    .await;

    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data,
        value!({
            "availability": [
                { "range": { "start": "10:00:00", "end": "12:00:00" } }
            ]
        })
    );
}
