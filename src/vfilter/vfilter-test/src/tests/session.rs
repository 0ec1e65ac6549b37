/*
 * vFilter mail filtering relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::run_test;
use pretty_assertions::assert_eq;

run_test! {
    fn rcpt_before_mail,
    input = [
        "HELO client.example.com\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "503 Bad command sequence\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
}

run_test! {
    fn rcpt_after_rset,
    input = [
        "HELO client.example.com\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RSET\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "DATA\r\n",
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "503 Bad command sequence\r\n",
        "503 Bad command sequence\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
}

run_test! {
    fn unknown_command,
    input = [
        "HELO client.example.com\r\n",
        "VRFY postmaster\r\n",
        "NOOP\r\n",
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "500 Command not recognized\r\n",
        "250 Ok\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
}

run_test! {
    fn dot_stuffed_lines_are_forwarded_unchanged,
    input = [
        "EHLO client.example.com\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "DATA\r\n",
        "Subject: dots\r\n\r\n..\r\n..leading dot\r\n.\r\n",
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "354 Enter data, end with <CRLF>.<CRLF>\r\n",
        "250 2.0.0 Ok: queued as 1234\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
    received = |sessions| {
        assert_eq!(
            sessions[0].messages,
            [b"Subject: dots\r\n\r\n.\r\n.leading dot\r\n".to_vec()]
        );
    }
}

run_test! {
    fn two_transactions_on_one_connection,
    input = [
        "HELO client.example.com\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "RCPT TO:<t@y.com>\r\n",
        "DATA\r\n",
        "Subject: first\r\n\r\nhi\r\n.\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "DATA\r\n",
        "Subject: second\r\n\r\nhi\r\n.\r\n",
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "354 Enter data, end with <CRLF>.<CRLF>\r\n",
        "250 2.0.0 Ok: queued as 1234\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "354 Enter data, end with <CRLF>.<CRLF>\r\n",
        "250 2.0.0 Ok: queued as 1234\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
}

run_test! {
    fn message_too_large,
    input = [
        "HELO client.example.com\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "DATA\r\n",
        &format!("Subject: big\r\n\r\n{}\r\n.\r\n", "X".repeat(200)),
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "354 Enter data, end with <CRLF>.<CRLF>\r\n",
        "552 Message size exceeds fixed maximum message size\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
    configure = |config: &mut vfilter_config::Config| config.main.max_message_size = 100,
}

run_test! {
    fn headers_are_prepended_on_reinjection,
    input = [
        "HELO client.example.com\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "DATA\r\n",
        "Subject: hello\r\n\r\nhi\r\n.\r\n",
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "354 Enter data, end with <CRLF>.<CRLF>\r\n",
        "250 2.0.0 Ok: queued as 1234\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
    configure = |config: &mut vfilter_config::Config| {
        config.main.scanners.push("spam_header".to_owned());
    },
    received = |sessions| {
        let message = String::from_utf8(sessions[0].messages[0].clone()).unwrap();
        assert!(message.contains("X-Vfilter-Spamstatus: NO\r\n"), "{message}");
        assert!(message.contains("X-Vfilter-Virus: NO\r\n"), "{message}");
        assert!(message.ends_with("Subject: hello\r\n\r\nhi\r\n"), "{message}");
    }
}
