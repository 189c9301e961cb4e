mod common;

use std::{cell::RefCell, rc::Rc};

use icd_check::checks::{Check, CheckSpec, RowMap};
use icd_check::errors::{IcdError, ParserSyntaxError};
use icd_check::fields::{CustomFieldFormat, FieldSpec, FieldValue};
use icd_check::icd::{Icd, Row, ValidationListener};

use common::customers_icd;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Accepted(usize),
    Rejected(usize, String),
    CheckFailedAtRow(usize, String),
    CheckFailedAtEnd(String),
    DataFormatFailed(String),
}

#[derive(Clone, Default)]
struct Collector {
    events: Rc<RefCell<Vec<Event>>>,
}

impl Collector {
    fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

impl ValidationListener for Collector {
    fn accepted_row(&mut self, row: &Row) {
        self.events.borrow_mut().push(Event::Accepted(row.number));
    }

    fn rejected_row(&mut self, row: &Row, error: &IcdError) {
        self.events
            .borrow_mut()
            .push(Event::Rejected(row.number, error.to_string()));
    }

    fn check_failed_at_row(&mut self, row: &Row, error: &IcdError) {
        self.events
            .borrow_mut()
            .push(Event::CheckFailedAtRow(row.number, error.to_string()));
    }

    fn check_failed_at_end(&mut self, error: &IcdError) {
        self.events
            .borrow_mut()
            .push(Event::CheckFailedAtEnd(error.to_string()));
    }

    fn data_format_failed(&mut self, error: &ParserSyntaxError) {
        self.events
            .borrow_mut()
            .push(Event::DataFormatFailed(error.to_string()));
    }
}

fn load_customers_icd() -> (Icd, Collector) {
    let mut icd = Icd::new();
    icd.load(customers_icd().as_bytes()).expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));
    (icd, collector)
}

fn load_error(icd_text: &str) -> IcdError {
    Icd::new()
        .load(icd_text.as_bytes())
        .expect_err("ICD must not load")
}

#[test]
fn loads_the_customers_icd() {
    let (icd, _) = load_customers_icd();
    assert_eq!(
        icd.field_names(),
        vec![
            "branch_id",
            "customer_id",
            "first_name",
            "surname",
            "gender",
            "date_of_birth",
        ]
    );
    assert_eq!(icd.checks().len(), 2);
    assert_eq!(icd.data_format().expect("format set").kind().name(), "CSV");

    let first_name = icd.field_format("first_name").expect("field exists");
    assert!(first_name.allow_empty());
    let surname = icd.field_format("surname").expect("field exists");
    assert!(!surname.length().is_unconstrained());
    assert!(icd.field_format("no_such_field").is_none());
}

#[test]
fn accepts_a_valid_row() {
    let (mut icd, events) = load_customers_icd();
    icd.validate("38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"".as_bytes())
        .unwrap();
    assert_eq!(events.events(), vec![Event::Accepted(1)]);
}

#[test]
fn duplicate_key_fails_the_unique_check_citing_first_row() {
    let (mut icd, events) = load_customers_icd();
    let data = "38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"\n\
                38000,23,\"Jane\",\"Doe\",\"female\",\"04.10.1946\"\n";
    icd.validate(data.as_bytes()).unwrap();
    let events = events.events();
    assert_eq!(events[0], Event::Accepted(1));
    let Event::CheckFailedAtRow(2, message) = &events[1] else {
        panic!("expected a check failure, got {:?}", events[1]);
    };
    assert!(message.contains("row 1"), "{message}");
    assert_eq!(events.len(), 2);
}

#[test]
fn bad_branch_id_is_rejected_by_the_regex() {
    let (mut icd, events) = load_customers_icd();
    icd.validate("37999,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"".as_bytes())
        .unwrap();
    let events = events.events();
    let Event::Rejected(1, message) = &events[0] else {
        panic!("expected a rejection, got {:?}", events[0]);
    };
    assert!(message.contains("branch_id"), "{message}");
}

#[test]
fn bad_choice_is_rejected() {
    let (mut icd, events) = load_customers_icd();
    icd.validate("38000,23,\"John\",\"Doe\",\"alien\",\"08.03.1957\"".as_bytes())
        .unwrap();
    let events = events.events();
    let Event::Rejected(1, message) = &events[0] else {
        panic!("expected a rejection, got {:?}", events[0]);
    };
    assert!(message.contains("gender"), "{message}");
}

#[test]
fn invalid_calendar_date_is_rejected() {
    let (mut icd, events) = load_customers_icd();
    icd.validate("38000,23,\"John\",\"Doe\",\"male\",\"30.02.1957\"".as_bytes())
        .unwrap();
    let events = events.events();
    assert!(matches!(&events[0], Event::Rejected(1, _)), "{events:?}");
}

#[test]
fn ten_distinct_branches_fail_the_distinct_count_at_end() {
    let (mut icd, events) = load_customers_icd();
    let mut data = String::new();
    for index in 0..10 {
        data.push_str(&format!(
            "38{index:03},{index},\"John\",\"Doe\",\"male\",\"08.03.1957\"\n"
        ));
    }
    icd.validate(data.as_bytes()).unwrap();
    let events = events.events();
    assert_eq!(events.len(), 11);
    for (index, event) in events.iter().take(10).enumerate() {
        assert_eq!(*event, Event::Accepted(index + 1));
    }
    let Event::CheckFailedAtEnd(message) = &events[10] else {
        panic!("expected an end-of-data check failure, got {:?}", events[10]);
    };
    assert!(message.contains("10"), "{message}");
}

#[test]
fn wrong_column_count_is_rejected() {
    let (mut icd, events) = load_customers_icd();
    icd.validate("38000,23,\"John\"".as_bytes()).unwrap();
    let events = events.events();
    let Event::Rejected(1, message) = &events[0] else {
        panic!("expected a rejection, got {:?}", events[0]);
    };
    assert!(message.contains('6'), "{message}");
    assert!(message.contains('3'), "{message}");
}

#[test]
fn rejected_rows_do_not_register_in_checks() {
    let (mut icd, events) = load_customers_icd();
    // Row 1 is rejected (bad gender); row 2 with the same key must pass
    // the uniqueness check because rejected rows leave no trace.
    let data = "38000,23,\"John\",\"Doe\",\"alien\",\"08.03.1957\"\n\
                38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"\n";
    icd.validate(data.as_bytes()).unwrap();
    let events = events.events();
    assert!(matches!(events[0], Event::Rejected(1, _)), "{events:?}");
    assert_eq!(events[1], Event::Accepted(2));
}

#[test]
fn accepted_plus_rejected_equals_rows_consumed() {
    let (mut icd, events) = load_customers_icd();
    let data = "38000,1,\"a\",\"b\",\"male\",\"01.01.2000\"\n\
                bad,2,\"a\",\"b\",\"male\",\"01.01.2000\"\n\
                38000,1,\"x\",\"y\",\"male\",\"02.02.2002\"\n\
                38000,3,\"a\",\"b\",\"female\",\"03.03.2003\"\n";
    icd.validate(data.as_bytes()).unwrap();
    let (mut accepted, mut rejected) = (0, 0);
    for event in events.events() {
        match event {
            Event::Accepted(_) => accepted += 1,
            Event::Rejected(..) | Event::CheckFailedAtRow(..) => rejected += 1,
            _ => {}
        }
    }
    assert_eq!(accepted + rejected, 4);
    assert_eq!(accepted, 2);
}

#[test]
fn unterminated_quote_stops_validation() {
    let (mut icd, events) = load_customers_icd();
    let data = "38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"\n\
                38001,24,\"Jane";
    icd.validate(data.as_bytes()).unwrap();
    let events = events.events();
    assert_eq!(events[0], Event::Accepted(1));
    assert!(matches!(events[1], Event::DataFormatFailed(_)), "{events:?}");
    assert_eq!(events.len(), 2);
}

#[test]
fn empty_input_emits_no_events() {
    let (mut icd, events) = load_customers_icd();
    icd.validate("".as_bytes()).unwrap();
    assert!(events.events().is_empty());
}

#[test]
fn header_rows_are_skipped() {
    let mut icd = Icd::new();
    let icd_text = customers_icd().replace(
        "D,Item Delimiter,\",\",,,",
        "D,Item Delimiter,\",\",,,\nD,Header,1,,,",
    );
    icd.load(icd_text.as_bytes()).expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));

    let data = "branch,customer,first,sur,gender,born\n\
                38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"\n";
    icd.validate(data.as_bytes()).unwrap();
    // The data row is numbered 1, not 2: headers do not count.
    assert_eq!(collector.events(), vec![Event::Accepted(1)]);
}

#[test]
fn header_only_input_still_runs_end_checks() {
    let mut icd = Icd::new();
    let icd_text = customers_icd()
        .replace(
            "D,Item Delimiter,\",\",,,",
            "D,Item Delimiter,\",\",,,\nD,Header,1,,,",
        )
        .replace("branch_id < 10", "branch_id > 0");
    icd.load(icd_text.as_bytes()).expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));

    icd.validate("branch,customer,first,sur,gender,born\n".as_bytes())
        .unwrap();
    let events = collector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::CheckFailedAtEnd(_)), "{events:?}");
}

#[test]
fn reset_allows_sequential_validations() {
    let (mut icd, events) = load_customers_icd();
    let data = "38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"";
    icd.validate(data.as_bytes()).unwrap();
    icd.reset();
    icd.validate(data.as_bytes()).unwrap();
    // Without the reset the second run would fail the uniqueness check.
    assert_eq!(events.events(), vec![Event::Accepted(1), Event::Accepted(1)]);
}

#[test]
fn without_reset_check_state_carries_over() {
    let (mut icd, events) = load_customers_icd();
    let data = "38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"";
    icd.validate(data.as_bytes()).unwrap();
    icd.validate(data.as_bytes()).unwrap();
    let events = events.events();
    assert_eq!(events[0], Event::Accepted(1));
    assert!(matches!(events[1], Event::CheckFailedAtRow(1, _)), "{events:?}");
}

#[test]
fn validates_fixed_width_data() {
    let icd_text = [
        "D,Format,Fixed",
        "D,Line Delimiter,LF",
        "F,branch_id,RegEx,,5:5,38\\d\\d\\d",
        "F,customer_id,Integer,,4:4,",
        "F,surname,Text,,10:10,",
    ]
    .join("\n");
    let mut icd = Icd::new();
    icd.load(icd_text.as_bytes()).expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));

    icd.validate("38000 123Doe       \n38001  77Miller    \n".as_bytes())
        .unwrap();
    assert_eq!(
        collector.events(),
        vec![Event::Accepted(1), Event::Accepted(2)]
    );
}

#[test]
fn fixed_width_needs_exact_field_lengths() {
    let icd_text = [
        "D,Format,Fixed",
        "F,branch_id,Text,,1:5,",
    ]
    .join("\n");
    let err = load_error(&icd_text);
    assert!(matches!(err, IcdError::FieldSyntax(_)), "{err}");
}

#[test]
fn allowed_characters_reject_rows_with_outside_characters() {
    let icd_text = [
        "D,Format,CSV",
        "D,Allowed Characters,\"32:126\"",
        "F,code,Text,,,",
    ]
    .join("\n");
    let mut icd = Icd::new();
    icd.load(icd_text.as_bytes()).expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));

    icd.validate("plain\ngr\u{fc}n\n".as_bytes()).unwrap();
    let events = collector.events();
    assert_eq!(events[0], Event::Accepted(1));
    let Event::Rejected(2, message) = &events[1] else {
        panic!("expected a rejection, got {:?}", events[1]);
    };
    assert!(message.contains("252"), "{message}");
}

#[test]
fn spreadsheet_formats_validate_through_row_iterators() {
    let icd_text = ["D,Format,ODS", "F,name,Text,,,", "F,amount,Integer,,,"].join("\n");
    let mut icd = Icd::new();
    icd.load(icd_text.as_bytes()).expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));

    let err = icd
        .validate("name,amount".as_bytes())
        .expect_err("byte streams are not spreadsheets");
    assert!(matches!(err, IcdError::DataFormatSyntax(_)), "{err}");

    let rows = vec![
        Ok(vec!["widget".to_string(), "3".to_string()]),
        Ok(vec!["gadget".to_string(), "not-a-number".to_string()]),
    ];
    icd.validate_rows(rows);
    let events = collector.events();
    assert_eq!(events[0], Event::Accepted(1));
    assert!(matches!(events[1], Event::Rejected(2, _)), "{events:?}");
}

#[test]
fn listeners_are_notified_in_registration_order() {
    let (mut icd, first) = load_customers_icd();
    let second = Collector::default();
    icd.add_listener(Box::new(second.clone()));
    icd.validate("38000,23,\"John\",\"Doe\",\"male\",\"08.03.1957\"".as_bytes())
        .unwrap();
    assert_eq!(first.events(), second.events());
}

#[test]
fn icd_with_unknown_marker_cites_its_line() {
    let icd_text = "D,Format,CSV\nF,name,Text,,,\nQ,bogus";
    let err = load_error(icd_text);
    let IcdError::IcdSyntax { line, message } = err else {
        panic!("expected an ICD syntax error, got {err}");
    };
    assert_eq!(line, 3);
    assert!(message.contains("\"Q\""), "{message}");
}

#[test]
fn icd_without_data_format_fails_lookup() {
    let err = load_error("F,name,Text,,,");
    assert!(matches!(err, IcdError::DataFormatLookup(_)), "{err}");
}

#[test]
fn icd_without_fields_fails_lookup() {
    let err = load_error("D,Format,CSV");
    assert!(matches!(err, IcdError::FieldLookup(_)), "{err}");
}

#[test]
fn icd_with_second_format_row_fails() {
    let err = load_error("D,Format,CSV\nD,Format,CSV\nF,name,Text,,,");
    assert!(matches!(err, IcdError::DataFormatValue(_)), "{err}");
}

#[test]
fn icd_with_option_before_format_fails() {
    let err = load_error("D,Header,1\nD,Format,CSV\nF,name,Text,,,");
    assert!(matches!(err, IcdError::DataFormatSyntax(_)), "{err}");
}

#[test]
fn icd_with_duplicate_field_name_fails() {
    let err = load_error("D,Format,CSV\nF,name,Text,,,\nF,name,Integer,,,");
    assert!(matches!(err, IcdError::FieldLookup(_)), "{err}");
}

#[test]
fn icd_with_duplicate_check_description_fails() {
    let icd_text = "D,Format,CSV\nF,name,Text,,,\n\
                    C,unique names,IsUnique,name\nC,unique names,IsUnique,name";
    let err = load_error(icd_text);
    assert!(matches!(err, IcdError::CheckSyntax(_)), "{err}");
}

#[test]
fn icd_with_broken_empty_marker_fails() {
    let err = load_error("D,Format,CSV\nF,name,Text,y,,");
    assert!(matches!(err, IcdError::IcdSyntax { .. }), "{err}");
}

#[test]
fn icd_comment_rows_are_ignored() {
    let icd_text = ",any text at all\nD,Format,CSV\n,,,\nF,name,Text,,,\n";
    Icd::new().load(icd_text.as_bytes()).expect("ICD loads");
}

#[test]
fn icd_markers_are_case_insensitive() {
    let icd_text = "d,Format,CSV\nf,name,Text,,,\nc,unique names,IsUnique,name";
    let icd = {
        let mut icd = Icd::new();
        icd.load(icd_text.as_bytes()).expect("ICD loads");
        icd
    };
    assert_eq!(icd.checks().len(), 1);
}

#[test]
fn icd_may_use_semicolon_delimiters() {
    let icd_text = "D;Format;CSV\nF;name;Text;;;\nF;amount;Integer;;;";
    let mut icd = Icd::new();
    icd.load(icd_text.as_bytes()).expect("ICD loads");
    assert_eq!(icd.field_names(), vec!["name", "amount"]);
}

#[derive(Debug)]
struct EvenLengthFormat;

impl CustomFieldFormat for EvenLengthFormat {
    fn validate_value(&self, raw: &str) -> Result<FieldValue, IcdError> {
        if raw.chars().count() % 2 == 0 {
            Ok(FieldValue::Text(raw.to_string()))
        } else {
            Err(IcdError::FieldValue(format!(
                "value {raw:?} must have an even number of characters"
            )))
        }
    }
}

#[test]
fn custom_field_types_extend_the_factory() {
    let mut icd = Icd::new();
    icd.register_field_type(
        "EvenLength",
        Box::new(|_spec: &FieldSpec<'_>| {
            Ok(Box::new(EvenLengthFormat) as Box<dyn CustomFieldFormat>)
        }),
    );
    icd.load("D,Format,CSV\nF,code,EvenLength,,,".as_bytes())
        .expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));

    icd.validate("ab\nabc\n".as_bytes()).unwrap();
    let events = collector.events();
    assert_eq!(events[0], Event::Accepted(1));
    assert!(matches!(events[1], Event::Rejected(2, _)), "{events:?}");
}

#[derive(Debug)]
struct RowCountAtMost {
    limit: usize,
    rows: usize,
}

impl Check for RowCountAtMost {
    fn description(&self) -> &str {
        "row count"
    }

    fn rule(&self) -> &str {
        ""
    }

    fn record_row(&mut self, _row_number: usize, _row: &RowMap<'_>) {
        self.rows += 1;
    }

    fn check_at_end(&self) -> Result<(), IcdError> {
        if self.rows > self.limit {
            return Err(IcdError::Check(format!(
                "row count is {} but must be at most {}",
                self.rows, self.limit
            )));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.rows = 0;
    }
}

#[test]
fn custom_check_types_extend_the_factory() {
    let mut icd = Icd::new();
    icd.register_check_type(
        "RowCount",
        Box::new(|spec: &CheckSpec<'_>| {
            let limit = spec.rule.trim().parse().map_err(|_| {
                IcdError::CheckSyntax("rule must be the maximum row count".to_string())
            })?;
            Ok(Box::new(RowCountAtMost { limit, rows: 0 }) as Box<dyn Check>)
        }),
    );
    icd.load("D,Format,CSV\nF,name,Text,,,\nC,few rows,RowCount,1".as_bytes())
        .expect("ICD loads");
    let collector = Collector::default();
    icd.add_listener(Box::new(collector.clone()));

    icd.validate("a\nb\n".as_bytes()).unwrap();
    let events = collector.events();
    assert_eq!(events[0], Event::Accepted(1));
    assert_eq!(events[1], Event::Accepted(2));
    assert!(matches!(events[2], Event::CheckFailedAtEnd(_)), "{events:?}");
}
