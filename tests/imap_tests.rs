use chrono::DateTime;
use imap_migrator::catalog;
use imap_migrator::imap::{ImapClient, ImapConfig, ImapConnection, ImapSession, MessageFlag};
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

fn config() -> ImapConfig {
    ImapConfig::new(
        "imap.example.com".to_string(),
        143,
        "alice@example.com".to_string(),
        "s3cret".to_string(),
    )
    .with_timeout(5)
}

/// Canned server: answer each expected client line with a fixed reply
fn scripted_server(
    server: DuplexStream,
    script: Vec<(&'static str, &'static [u8])>,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let (read_half, mut write_half) = split(server);
        let mut reader = BufReader::new(read_half);
        let mut received = Vec::new();
        write_half
            .write_all(b"* OK IMAP4rev1 Service Ready\r\n")
            .await
            .unwrap();
        for (expected, reply) in script {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            assert!(line.starts_with(expected), "unexpected client line {:?}", line);
            received.push(line);
            write_half.write_all(reply).await.unwrap();
        }
        received
    })
}

async fn connected_client(server: Vec<(&'static str, &'static [u8])>) -> (ImapClient, JoinHandle<Vec<String>>) {
    let (client_stream, server_stream) = duplex(16 * 1024);
    let handle = scripted_server(server_stream, server);
    let mut connection = ImapConnection::new(config());
    connection.connect_stream(client_stream).await.unwrap();
    let mut client = ImapClient::from_connection(connection);
    client.login().await.unwrap();
    (client, handle)
}

#[tokio::test]
async fn test_catalog_over_a_real_conversation() {
    let (mut client, handle) = connected_client(vec![
        ("A0001 LOGIN \"alice@example.com\" \"s3cret\"", b"A0001 OK LOGIN completed\r\n"),
        (
            "A0002 CAPABILITY",
            b"* CAPABILITY IMAP4rev1 UIDPLUS\r\nA0002 OK CAPABILITY completed\r\n",
        ),
        (
            "A0003 LIST \"\" \"*\"",
            b"* LIST (\\HasChildren) \"/\" \"INBOX\"\r\n\
              * LIST (\\HasNoChildren) \"/\" \"INBOX/Work\"\r\n\
              * LIST (\\HasNoChildren) \"/\" {4}\r\nSent\r\n\
              A0003 OK LIST completed\r\n",
        ),
        (
            "A0004 STATUS \"INBOX\" (MESSAGES)",
            b"* STATUS \"INBOX\" (MESSAGES 2)\r\nA0004 OK STATUS completed\r\n",
        ),
        (
            "A0005 STATUS \"INBOX/Work\" (MESSAGES)",
            b"* STATUS \"INBOX/Work\" (MESSAGES 3)\r\nA0005 OK STATUS completed\r\n",
        ),
        (
            "A0006 STATUS \"Sent\" (MESSAGES)",
            b"* STATUS Sent (MESSAGES 0)\r\nA0006 OK STATUS completed\r\n",
        ),
    ])
    .await;
    assert!(client.is_logged_in());

    let tree = catalog::list_folders(&mut client).await.unwrap();
    assert_eq!(tree.delimiter.as_deref(), Some("/"));
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.render(), "INBOX (2)\n  Work (3)\nSent (0)\n");
    assert!(tree.issues.is_empty());

    drop(client);
    assert_eq!(handle.await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_fetch_and_append_keep_bytes_flags_and_date() {
    let (mut client, handle) = connected_client(vec![
        ("A0001 LOGIN", b"A0001 OK LOGIN completed\r\n"),
        ("A0002 CAPABILITY", b"* CAPABILITY IMAP4rev1\r\nA0002 OK done\r\n"),
        (
            "A0003 EXAMINE \"INBOX\"",
            b"* 2 EXISTS\r\n\
              * OK [UIDVALIDITY 1700] UIDs valid\r\n\
              * OK [UIDNEXT 9] Predicted next UID\r\n\
              A0003 OK [READ-ONLY] EXAMINE completed\r\n",
        ),
        ("A0004 UID SEARCH ALL", b"* SEARCH 8 3\r\nA0004 OK SEARCH completed\r\n"),
        (
            "A0005 UID FETCH 3 (UID FLAGS INTERNALDATE BODY.PEEK[])",
            b"* 1 FETCH (UID 3 FLAGS (\\Seen $Work) INTERNALDATE \"01-Mar-2023 09:15:00 +0100\" BODY[] {9}\r\n\
              hi\r\nthere)\r\nA0005 OK FETCH completed\r\n",
        ),
        ("A0006 APPEND \"Sent\" (\\Seen $Work) \"", b"+ Ready for literal data\r\n"),
        ("hi", b""),
        ("there", b"A0006 OK [APPENDUID 1 12] APPEND completed\r\n"),
    ])
    .await;

    let status = client.examine("INBOX").await.unwrap();
    assert_eq!(status.exists, 2);
    assert_eq!(status.uid_validity, Some(1700));
    assert_eq!(client.uid_search_all().await.unwrap(), vec![3, 8]);

    let message = client.fetch_message(3).await.unwrap().unwrap();
    assert_eq!(message.body, b"hi\r\nthere".to_vec());
    assert_eq!(
        message.flags,
        vec![MessageFlag::Seen, MessageFlag::Custom("$Work".to_string())]
    );
    let date = message.internal_date.unwrap();
    assert_eq!(date, DateTime::parse_from_rfc3339("2023-03-01T09:15:00+01:00").unwrap());
    assert_eq!(date.offset().local_minus_utc(), 3600);

    let mut flags = message.flags.clone();
    flags.push(MessageFlag::Recent);
    ImapSession::append(&mut client, "Sent", &flags, message.internal_date, &message.body)
        .await
        .unwrap();

    drop(client);
    let received = handle.await.unwrap();
    assert!(!received[5].contains("\\Recent"));
    assert!(received[5].ends_with(" {9}\r\n"));
    assert_eq!(received[6], "hi\r\n");
    assert_eq!(received[7], "there\r\n");
}

#[tokio::test]
async fn test_rejected_login_is_an_authentication_error() {
    let (client_stream, server_stream) = duplex(4096);
    let handle = scripted_server(
        server_stream,
        vec![(
            "A0001 LOGIN",
            b"A0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n",
        )],
    );
    let mut connection = ImapConnection::new(config());
    connection.connect_stream(client_stream).await.unwrap();
    let mut client = ImapClient::from_connection(connection);

    let err = client.login().await.unwrap_err();
    assert!(err.is_auth_error());
    assert!(!err.is_recoverable());
    assert!(!client.is_logged_in());
    handle.await.unwrap();
}
