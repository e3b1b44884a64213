use gltrace::lifetime::{Pass, CONVERSION_NAME};
use gltrace::registry::{ArgKind, DELETE_CLIENT_SIDE_BUFFER};
use gltrace::{
    inject_client_side_deletes, CallRecord, CallStream, ClientSideAnalysis, Header, Registry,
    Signature, TraceError, TraceWriter, Value,
};
use std::collections::BTreeMap;

fn build(registry: &Registry, calls: &[(&str, u32, u32, Vec<Value<'static>>)]) -> Vec<u8> {
    let mut writer = TraceWriter::new(Vec::new());
    writer.write_header(br#"{"glesVersion":2}"#).unwrap();
    for (name, tid, callno, args) in calls {
        let signature = registry.by_name(name).unwrap();
        let call = CallRecord::new(signature, *tid, *callno, args.clone()).unwrap();
        writer.append(&call).unwrap();
    }
    writer.finish().unwrap()
}

fn decode(registry: &Registry, bytes: &Vec<u8>) -> (Header, Vec<CallRecord<'static>>) {
    let mut stream = CallStream::open(bytes, registry).unwrap();
    let header = Header::parse(stream.header()).unwrap();
    let mut calls = Vec::new();
    while let Some(call) = stream.next_call().unwrap() {
        calls.push(call.into_owned());
    }
    (header, calls)
}

fn rewrite(registry: &Registry, bytes: &Vec<u8>) -> (Vec<u8>, usize) {
    let mut writer = TraceWriter::new(Vec::new());
    let summary = inject_client_side_deletes(bytes, registry, &mut writer).unwrap();
    (writer.finish().unwrap(), summary.injected)
}

fn data(id: u32) -> Vec<Value<'static>> {
    vec![
        Value::ClientSideBuffer(id),
        Value::Int64(4),
        Value::blob(b"\x00\x01\x02\x03"),
    ]
}

fn attrib(id: u32) -> Vec<Value<'static>> {
    vec![
        Value::UInt32(0),
        Value::Int32(3),
        Value::Enum(0x1406),
        Value::Int32(0),
        Value::Int32(0),
        Value::ClientSideRef {
            buffer: id,
            offset: 0,
        },
    ]
}

fn draw() -> Vec<Value<'static>> {
    vec![Value::Enum(0x0004), Value::Int32(0), Value::Int32(3)]
}

#[test]
fn test_deletion_follows_last_use_on_its_thread() {
    let registry = Registry::gles();
    let source = build(
        &registry,
        &[
            ("glFinish", 2, 1, vec![]),
            ("glDrawArrays", 2, 2, draw()),
            ("glClientSideBufferData", 1, 3, data(5)),
            ("glFinish", 2, 4, vec![]),
            ("glDrawArrays", 1, 5, draw()),
            ("glDrawArrays", 2, 6, draw()),
            ("glVertexAttribPointer", 1, 7, attrib(5)),
            ("glFinish", 2, 8, vec![]),
            ("glDrawArrays", 1, 9, draw()),
        ],
    );

    let analysis = ClientSideAnalysis::run(&source, &registry).unwrap();
    assert_eq!(analysis.records(), 9);
    assert_eq!(analysis.last_use().get(1, 5).unwrap().callno(), 7);
    assert_eq!(
        analysis.last_use().get(1, 5).unwrap().reason(),
        "glVertexAttribPointer arg 5"
    );
    assert!(analysis.last_use().get(2, 5).is_none());

    let mut writer = TraceWriter::new(Vec::new());
    let summary = analysis.rewrite(&mut writer).unwrap();
    assert_eq!(summary.records, 9);
    assert_eq!(summary.injected, 1);
    assert_eq!(summary.threads, BTreeMap::from([(1, 1)]));

    let output = writer.finish().unwrap();
    let (header, calls) = decode(&registry, &output);
    let numbers: Vec<_> = calls.iter().map(|call| call.callno()).collect();
    assert_eq!(numbers, [1, 2, 3, 4, 5, 6, 7, 7, 8, 9]);

    let deletion = &calls[7];
    assert!(deletion.is_synthetic());
    assert_eq!(deletion.name(), DELETE_CLIENT_SIDE_BUFFER);
    assert_eq!(deletion.tid(), 1);
    assert_eq!(deletion.args(), &[Value::ClientSideBuffer(5)]);
    assert_eq!(calls.iter().filter(|call| call.is_synthetic()).count(), 1);

    assert_eq!(header.get("glesVersion"), Some(&serde_json::json!(2)));
    let conversions = header.conversions();
    assert_eq!(conversions.len(), 1);
    assert_eq!(conversions[0].kind, CONVERSION_NAME);
    assert_eq!(conversions[0].source, "<memory>");
}

#[test]
fn test_second_rewrite_adds_nothing() {
    let registry = Registry::gles();
    let source = build(
        &registry,
        &[
            ("glClientSideBufferData", 0, 1, data(1)),
            ("glClientSideBufferData", 0, 2, data(2)),
            ("glVertexAttribPointer", 0, 3, attrib(1)),
            ("glDrawArrays", 0, 4, draw()),
        ],
    );

    let (once, injected) = rewrite(&registry, &source);
    assert_eq!(injected, 2);
    let (twice, injected) = rewrite(&registry, &once);
    assert_eq!(injected, 0);

    let (first_header, first) = decode(&registry, &once);
    let (second_header, second) = decode(&registry, &twice);
    assert_eq!(first, second);
    assert_eq!(first_header.conversions().len(), 1);
    assert_eq!(second_header.conversions().len(), 2);
}

#[test]
fn test_buffer_reused_after_deletion_is_deleted_again() {
    let registry = Registry::gles();
    let delete = vec![Value::ClientSideBuffer(3)];
    let source = build(
        &registry,
        &[
            ("glClientSideBufferData", 0, 1, data(3)),
            (DELETE_CLIENT_SIDE_BUFFER, 0, 2, delete),
            ("glClientSideBufferData", 0, 3, data(3)),
            ("glDrawArrays", 0, 4, draw()),
        ],
    );

    let (output, injected) = rewrite(&registry, &source);
    assert_eq!(injected, 1);
    let (_, calls) = decode(&registry, &output);
    assert!(calls[3].is_synthetic());
    assert_eq!(calls[3].callno(), 3);
    assert_eq!(calls[3].args(), &[Value::ClientSideBuffer(3)]);
}

#[test]
fn test_deletions_at_the_same_call_are_ordered_by_id() {
    let mut registry = Registry::gles();
    let both = &[ArgKind::ClientSideBuffer, ArgKind::ClientSideBuffer];
    registry
        .register(Signature::new(0x7e00, "glTwoBuffers", both, None))
        .unwrap();
    let source = build(
        &registry,
        &[
            ("glClientSideBufferData", 0, 3, data(2)),
            ("glClientSideBufferData", 0, 4, data(9)),
            (
                "glTwoBuffers",
                0,
                5,
                vec![Value::ClientSideBuffer(9), Value::ClientSideBuffer(2)],
            ),
            ("glFinish", 0, 6, vec![]),
        ],
    );

    let (once, injected) = rewrite(&registry, &source);
    assert_eq!(injected, 2);
    let (_, calls) = decode(&registry, &once);
    let tail: Vec<_> = calls[2..]
        .iter()
        .map(|call| (call.name(), call.callno(), call.is_synthetic(), call.args().to_vec()))
        .collect();
    assert_eq!(
        tail,
        [
            (
                "glTwoBuffers",
                5,
                false,
                vec![Value::ClientSideBuffer(9), Value::ClientSideBuffer(2)]
            ),
            (DELETE_CLIENT_SIDE_BUFFER, 5, true, vec![Value::ClientSideBuffer(2)]),
            (DELETE_CLIENT_SIDE_BUFFER, 5, true, vec![Value::ClientSideBuffer(9)]),
            ("glFinish", 6, false, vec![]),
        ]
    );

    let (_, injected) = rewrite(&registry, &once);
    assert_eq!(injected, 0);
}

#[test]
fn test_deletions_match_last_references() {
    let registry = Registry::gles();
    let mut calls = Vec::new();
    let mut seed: u32 = 0x2545_f491;
    for callno in 1..=400 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let tid = (seed >> 8) % 3;
        let id = (seed >> 16) % 6 + 1;
        match (seed >> 4) % 3 {
            0 => calls.push(("glClientSideBufferData", tid, callno, data(id))),
            1 => calls.push(("glVertexAttribPointer", tid, callno, attrib(id))),
            _ => calls.push(("glDrawArrays", tid, callno, draw())),
        }
    }
    let source = build(&registry, &calls);
    let (output, injected) = rewrite(&registry, &source);
    let (_, input) = decode(&registry, &source);
    let (_, output) = decode(&registry, &output);

    let mut expected: BTreeMap<(u32, u32), u32> = BTreeMap::new();
    for call in input.iter() {
        for id in call.args().iter().filter_map(Value::client_side_id) {
            let last = expected.entry((call.tid(), id)).or_default();
            *last = (*last).max(call.callno());
        }
    }
    assert_eq!(injected, expected.len());

    let recorded: Vec<_> = output
        .iter()
        .filter(|call| !call.is_synthetic())
        .map(|call| call.callno())
        .collect();
    let original: Vec<_> = input.iter().map(|call| call.callno()).collect();
    assert_eq!(recorded, original);

    for (index, call) in output.iter().enumerate() {
        if !call.is_synthetic() {
            continue;
        }
        let id = call.arg(0).and_then(Value::client_side_id).unwrap();
        assert_eq!(expected.get(&(call.tid(), id)), Some(&call.callno()));

        let anchor = output[..index]
            .iter()
            .rev()
            .find(|previous| !previous.is_synthetic())
            .unwrap();
        assert_eq!(anchor.callno(), call.callno());
        assert_eq!(anchor.tid(), call.tid());

        let reused = output[index + 1..].iter().any(|later| {
            later.tid() == call.tid()
                && later
                    .args()
                    .iter()
                    .any(|arg| arg.client_side_id() == Some(id))
        });
        assert!(!reused);
    }
}

#[test]
fn test_failures_report_processed_records() {
    let registry = Registry::gles();
    let mut source = build(
        &registry,
        &[
            ("glClientSideBufferData", 0, 1, data(1)),
            ("glDrawArrays", 0, 2, draw()),
            ("glDrawArrays", 0, 3, draw()),
        ],
    );
    source.truncate(source.len() - 2);

    let mut writer = TraceWriter::new(Vec::new());
    let err = inject_client_side_deletes(&source, &registry, &mut writer).unwrap_err();
    assert_eq!(err.pass, Pass::Discovery);
    assert_eq!(err.processed, 2);
    assert!(matches!(err.source, TraceError::Truncated));
}

#[test]
fn test_oversized_record_fails_the_rewrite() {
    let registry = Registry::gles();
    let payload = vec![0xaau8; 512];
    let source = build(
        &registry,
        &[
            ("glDrawArrays", 0, 1, draw()),
            (
                "glClientSideBufferData",
                0,
                2,
                vec![
                    Value::ClientSideBuffer(1),
                    Value::Int64(512),
                    Value::blob(&payload).into_owned(),
                ],
            ),
        ],
    );

    let mut writer = TraceWriter::new(Vec::new()).with_record_limit(256);
    let err = inject_client_side_deletes(&source, &registry, &mut writer).unwrap_err();
    assert_eq!(err.pass, Pass::Rewrite);
    assert_eq!(err.processed, 1);
    assert!(matches!(err.source, TraceError::SizeExceeded { limit: 256, .. }));

    let output = writer.finish().unwrap();
    let header_len = u32::from_le_bytes([output[0], output[1], output[2], output[3]]) as usize;
    assert!(output.len() >= 4 + header_len);
    let mut stream = CallStream::open(&output, &registry).unwrap();
    assert_eq!(stream.next_call().unwrap().unwrap().callno(), 1);
    assert!(stream.next_call().unwrap().is_none());
}

#[test]
fn test_missing_source_creates_nothing() {
    let registry = Registry::gles();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("missing.pat");
    let target = dir.path().join("out.pat");

    let err = match ClientSideAnalysis::run(&source, &registry) {
        Ok(_) => panic!("analysis of a missing file succeeded"),
        Err(err) => err,
    };
    assert_eq!(err.processed, 0);
    assert!(matches!(
        &err.source,
        TraceError::Io(io) if io.kind() == std::io::ErrorKind::NotFound
    ));
    assert!(!target.exists());
}

#[test]
fn test_file_backed_rewrite() {
    let registry = Registry::gles();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.pat");
    let target = dir.path().join("out.pat");
    std::fs::write(
        &source,
        build(
            &registry,
            &[
                ("glClientSideBufferData", 4, 10, data(8)),
                ("glDrawArrays", 4, 11, draw()),
            ],
        ),
    )
    .unwrap();

    let analysis = ClientSideAnalysis::run(&source, &registry).unwrap();
    let mut writer = TraceWriter::create(&target).unwrap();
    let summary = analysis.rewrite(&mut writer).unwrap();
    writer.finish().unwrap();
    assert_eq!(summary.injected, 1);

    let (header, calls) = decode(&registry, &std::fs::read(&target).unwrap());
    assert_eq!(header.conversions()[0].source, source.display().to_string());
    assert_eq!(calls.len(), 3);
    assert!(calls[1].is_synthetic());
    assert_eq!(calls[1].callno(), 10);
}
